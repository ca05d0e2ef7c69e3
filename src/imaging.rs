use image::GrayImage;
use opencv::{
    core::{self, Mat, Point, Scalar, Vector},
    imgproc,
    prelude::*,
};

/// 单帧的像素统计量，评分公式只读这里的值
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameStatistics {
    /// 灰度均值
    pub mean: f64,
    /// 灰度标准差（总体）
    pub std_dev: f64,
    /// 灰度方差（总体）
    pub variance: f64,
    /// 拉普拉斯响应的方差
    pub laplacian_variance: f64,
    /// Canny(50, 150) 边缘像素占比
    pub edge_density: f64,
    /// Canny(30, 100) 边缘像素占比
    pub edge_density_low: f64,
    /// Canny(100, 200) 边缘像素占比
    pub edge_density_high: f64,
    /// Canny(50, 150) 边缘图上的外轮廓数
    pub contour_count: usize,
    /// 直方图最亮 85 个 bin 的像素占比
    pub bright_fraction: f64,
    /// 直方图最暗 50 个 bin 的像素占比
    pub dark_fraction: f64,
}

impl FrameStatistics {
    /// 对一帧灰度图计算全部统计量；空帧全部为 0
    pub fn compute(frame: &GrayImage) -> opencv::Result<Self> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Self::default());
        }
        let gray = gray_mat(frame)?;

        let (mean, std_dev) = mean_and_std_dev(&gray)?;

        let edges = canny(&gray, 50.0, 150.0)?;
        let edge_density = edge_density(&edges)?;
        let contour_count = count_external_contours(&edges)?;

        let hist = histogram(&gray)?;
        let total: f64 = hist.iter().sum();
        let (bright_fraction, dark_fraction) = if total > 0.0 {
            let bright: f64 = hist[256 - 85..].iter().sum();
            let dark: f64 = hist[..50].iter().sum();
            (bright / total, dark / total)
        } else {
            (0.0, 0.0)
        };

        Ok(Self {
            mean,
            std_dev,
            variance: std_dev * std_dev,
            laplacian_variance: laplacian_variance(&gray)?,
            edge_density,
            edge_density_low: edge_density(&canny(&gray, 30.0, 100.0)?)?,
            edge_density_high: edge_density(&canny(&gray, 100.0, 200.0)?)?,
            contour_count,
            bright_fraction,
            dark_fraction,
        })
    }
}

/// GrayImage 拷贝为单通道 CV_8UC1 矩阵
pub fn gray_mat(frame: &GrayImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        frame.height() as i32,
        frame.width() as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(frame.as_raw());
    Ok(mat)
}

/// 均值与总体标准差
pub fn mean_and_std_dev(mat: &Mat) -> opencv::Result<(f64, f64)> {
    let mut mean = Vector::<f64>::new();
    let mut std_dev = Vector::<f64>::new();
    core::mean_std_dev(mat, &mut mean, &mut std_dev, &Mat::default())?;
    Ok((mean.get(0)?, std_dev.get(0)?))
}

/// 256 级灰度直方图
pub fn histogram(gray: &Mat) -> opencv::Result<[f64; 256]> {
    let mut images = Vector::<Mat>::new();
    images.push(gray.try_clone()?);

    let mut hist = Mat::default();
    imgproc::calc_hist(
        &images,
        &Vector::from_slice(&[0]),
        &Mat::default(),
        &mut hist,
        &Vector::from_slice(&[256]),
        &Vector::from_slice(&[0f32, 256f32]),
        false,
    )?;

    let mut bins = [0f64; 256];
    for (i, bin) in bins.iter_mut().enumerate() {
        *bin = *hist.at::<f32>(i as i32)? as f64;
    }
    Ok(bins)
}

/// 拉普拉斯响应（ksize = 1，CV_64F）的总体方差
pub fn laplacian_variance(gray: &Mat) -> opencv::Result<f64> {
    let mut lap = Mat::default();
    imgproc::laplacian(gray, &mut lap, core::CV_64F, 1, 1.0, 0.0, core::BORDER_DEFAULT)?;
    let (_, std_dev) = mean_and_std_dev(&lap)?;
    Ok(std_dev * std_dev)
}

/// Canny 边缘图（3x3 Sobel，L1 梯度），0/255
pub fn canny(gray: &Mat, low: f64, high: f64) -> opencv::Result<Mat> {
    let mut edges = Mat::default();
    imgproc::canny(gray, &mut edges, low, high, 3, false)?;
    Ok(edges)
}

/// 非零像素占比
pub fn edge_density(edges: &Mat) -> opencv::Result<f64> {
    let total = edges.total();
    if total == 0 {
        return Ok(0.0);
    }
    Ok(core::count_non_zero(edges)? as f64 / total as f64)
}

/// 外轮廓数量（RETR_EXTERNAL + CHAIN_APPROX_SIMPLE）
pub fn count_external_contours(edges: &Mat) -> opencv::Result<usize> {
    if edges.total() == 0 {
        return Ok(0);
    }
    let mut contours = Vector::<Vector<Point>>::new();
    imgproc::find_contours(
        edges,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;
    Ok(contours.len())
}

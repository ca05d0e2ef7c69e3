use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use image::GrayImage;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, warn};

/// 逐帧提供灰度图的视频源
pub trait FrameSource {
    /// 帧率；未知时为 0
    fn fps(&self) -> f64;

    /// 总帧数
    fn frame_count(&self) -> u64;

    /// 时长（秒）= 总帧数 / 帧率；帧率未知时为 0
    fn duration(&self) -> f64 {
        let fps = self.fps();
        if fps > 0.0 {
            self.frame_count() as f64 / fps
        } else {
            0.0
        }
    }

    /// 解码下一帧；没有更多帧时返回 `None`
    fn next_frame(&mut self) -> Result<Option<GrayImage>>;

    /// 跳过一帧（仍然需要解码，但不必转换成灰度图）；没有更多帧时返回 false
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.next_frame()?.is_some())
    }
}

/// 视频处理器，负责打开视频并顺序解码出灰度帧
///
/// 输入上下文、解码器和缩放器都归它所有，drop 时一并释放。
pub struct VideoProcessor {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    fps: f64,
    frame_count: u64,
    eof_sent: bool,
    exhausted: bool,
}

impl VideoProcessor {
    /// 打开视频文件并准备好灰度解码
    pub fn open(input_path: impl AsRef<Path>) -> Result<Self> {
        ffmpeg::init().context("初始化 FFmpeg 失败")?;

        // 只显示 FFmpeg 的错误和致命错误
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        let input_path = input_path.as_ref();
        let input = ffmpeg::format::input(&input_path)
            .with_context(|| format!("无法打开视频文件: {}", input_path.display()))?;

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .context("未找到视频流")?;
        let stream_index = video_stream.index();

        let rate = video_stream.avg_frame_rate();
        let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        // 容器没有给出帧数时按时长估算
        let frame_count = match video_stream.frames() {
            n if n > 0 => n as u64,
            _ if input.duration() > 0 && fps > 0.0 => {
                let seconds = input.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
                (seconds * fps).round() as u64
            }
            _ => 0,
        };

        let decoder_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
                .context("无法创建解码器上下文")?;
        let decoder = decoder_context
            .decoder()
            .video()
            .context("无法创建视频解码器")?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("无法创建缩放器")?;

        debug!(
            "视频已打开: {} ({}x{}, {:.2} fps, {} 帧)",
            input_path.display(),
            decoder.width(),
            decoder.height(),
            fps,
            frame_count
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            fps,
            frame_count,
            eof_sent: false,
            exhausted: false,
        })
    }

    /// 分辨率（宽, 高）
    pub fn resolution(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    /// 取出下一帧原始解码结果
    fn decode_next(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return Ok(Some(decoded)),
                Err(ffmpeg::Error::Eof) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                // EAGAIN：需要更多数据包
                Err(ffmpeg::Error::Other { .. }) => {}
                Err(e) => return Err(e).context("接收解码帧失败"),
            }

            if self.eof_sent {
                self.exhausted = true;
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        // 损坏的数据包直接跳过
                        warn!("发送数据包失败，跳过: {}", e);
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().context("刷新解码器失败")?;
                    self.eof_sent = true;
                }
                Err(e) => {
                    warn!("读取数据包失败，跳过: {}", e);
                }
            }
        }
    }

    /// 将 FFmpeg GRAY8 帧转换为 GrayImage（按行跨度拷贝）
    fn frame_to_image(&self, frame: &ffmpeg::frame::Video) -> Result<GrayImage> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let stride = frame.stride(0);
        let data = frame.data(0);

        let mut buf = Vec::with_capacity(width * height);
        for y in 0..height {
            let row = data
                .get(y * stride..y * stride + width)
                .context("灰度帧数据长度不足")?;
            buf.extend_from_slice(row);
        }

        GrayImage::from_raw(width as u32, height as u32, buf).context("构建灰度图失败")
    }
}

impl FrameSource for VideoProcessor {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<GrayImage>> {
        let Some(decoded) = self.decode_next()? else {
            return Ok(None);
        };

        let mut gray = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut gray)
            .context("灰度转换失败")?;
        self.frame_to_image(&gray).map(Some)
    }

    fn skip_frame(&mut self) -> Result<bool> {
        Ok(self.decode_next()?.is_some())
    }
}

/// 内存中的帧序列，用于已经解码好的帧
#[derive(Debug, Clone, Default)]
pub struct MemoryFrameSource {
    fps: f64,
    frame_count: u64,
    frames: VecDeque<GrayImage>,
}

impl MemoryFrameSource {
    pub fn new(fps: f64, frames: Vec<GrayImage>) -> Self {
        Self {
            fps,
            frame_count: frames.len() as u64,
            frames: frames.into(),
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<GrayImage>> {
        Ok(self.frames.pop_front())
    }
}

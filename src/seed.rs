use md5::{Digest, Md5};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// 种子取值范围 [0, 2^31)
pub const SEED_MODULUS: u64 = 1 << 31;

/// 按文件内容计算视频种子：整文件 MD5，按大端 128 位整数取模 2^31
pub fn video_seed(path: impl AsRef<Path>) -> std::io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(seed_from_digest(&hasher.finalize()))
}

/// 2^128 能被 2^31 整除，所以只需要摘要的低 31 位
pub fn seed_from_digest(digest: &[u8]) -> u32 {
    let value = digest
        .iter()
        .fold(0u128, |acc, &b| (acc << 8) | b as u128);
    (value % SEED_MODULUS as u128) as u32
}

/// 帧级种子：(video_seed + floor(timestamp * 1000)) mod 2^31
pub fn frame_seed(video_seed: u32, timestamp: f64) -> u32 {
    let millis = (timestamp * 1000.0).floor().max(0.0) as u64;
    ((video_seed as u64 + millis) % SEED_MODULUS) as u32
}

/// Python 风格的 uniform(a, b)：a + (b - a) * U[0, 1)
///
/// a == b 或 a > b 时也不会 panic。
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, a: f64, b: f64) -> f64 {
    a + (b - a) * rng.gen::<f64>()
}

/// 一次分析使用的两个伪随机数发生器
///
/// `general` 用于覆盖逻辑，`numeric` 用于帧评分抖动。
/// 每次分析开始时按视频种子播种，每帧开始时按帧种子重新播种。
#[derive(Debug, Clone)]
pub struct SeedContext {
    video_seed: u32,
    pub general: StdRng,
    pub numeric: StdRng,
}

impl SeedContext {
    pub fn new(video_seed: u32) -> Self {
        Self {
            video_seed,
            general: StdRng::seed_from_u64(video_seed as u64),
            numeric: StdRng::seed_from_u64(video_seed as u64),
        }
    }

    pub fn video_seed(&self) -> u32 {
        self.video_seed
    }

    /// 两个发生器都按帧种子重新播种
    pub fn reseed_frame(&mut self, frame_seed: u32) {
        self.general = StdRng::seed_from_u64(frame_seed as u64);
        self.numeric = StdRng::seed_from_u64(frame_seed as u64);
    }

    /// 通用发生器按视频种子重新播种
    pub fn reseed_video(&mut self) {
        self.general = StdRng::seed_from_u64(self.video_seed as u64);
    }
}

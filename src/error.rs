use thiserror::Error;

/// 视频分析失败的原因
///
/// 对调用方而言这些都只是 "分析失败"，具体原因只用于日志。
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("无法打开视频源: {0}")]
    UnopenableSource(String),

    #[error("没有采样到任何视频帧")]
    EmptySampleSet,

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("解码失败: {0}")]
    Decode(String),

    #[error("图像处理失败: {0}")]
    Imaging(#[from] opencv::Error),
}

impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        AnalysisError::Decode(format!("{:#}", err))
    }
}

/// 历史记录 / 用户文件存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("原子写入失败: {0}")]
    Persist(#[from] tempfile::PersistError),
}

use axum::{
    body::Body,
    extract::{Json, Query, State},
    http::{header, StatusCode},
    response::Json as ResponseJson,
};
use chrono::Local;
use futures_util::StreamExt;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::auth::UserStore;
use crate::config::AppConfig;
use crate::history::{HistoryStats, HistoryStore, PredictionRecord};
use crate::monitor::{run_monitor, select_record, MonitorSession, MonitorSettings};
use crate::processor::analyze_video;
use crate::report::{system_data_csv, user_overview, UserSummary};
use crate::result::SessionResult;
use crate::simulation::SimulationConfig;

/// 上传视频的默认大小上限
pub const MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// 所有 handler 共享的状态
///
/// 两个 store 在这里各建一次，所有请求共用同一把写锁。
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    history: HistoryStore,
    users: UserStore,
    upload_limit: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            history: HistoryStore::new(&config.history_file),
            users: UserStore::new(&config.users_file),
            config: Arc::new(config),
            upload_limit: MAX_UPLOAD_BYTES,
        }
    }

    /// 修改上传大小上限
    pub fn with_upload_limit(mut self, limit: u64) -> Self {
        self.upload_limit = limit;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }
}

/// 分析接口的响应
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub message: String,
    pub result: Option<SessionResult>,
    /// 写入历史时的记录
    pub record: Option<PredictionRecord>,
}

impl AnalyzeResponse {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
            record: None,
        }
    }
}

type AnalyzeReply = Result<ResponseJson<AnalyzeResponse>, (StatusCode, ResponseJson<AnalyzeResponse>)>;

fn analyze_error((status, message): (StatusCode, String)) -> (StatusCode, ResponseJson<AnalyzeResponse>) {
    (status, ResponseJson(AnalyzeResponse::failed(message)))
}

/// 在阻塞线程池中分析视频，按需写入历史
async fn run_analysis(
    state: &AppState,
    video_path: PathBuf,
    video_filename: &str,
    username: Option<&str>,
    save: bool,
    simulation: SimulationConfig,
) -> AnalyzeReply {
    let analysis = tokio::task::spawn_blocking(move || analyze_video(&video_path, &simulation))
        .await
        .map_err(|e| {
            error!("分析任务异常退出: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ResponseJson(AnalyzeResponse::failed("analysis failed")),
            )
        })?;

    let result = match analysis {
        Ok(result) => result,
        Err(e) => {
            error!("分析视频失败: {}: {}", video_filename, e);
            return Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                ResponseJson(AnalyzeResponse::failed("analysis failed")),
            ));
        }
    };

    let record = match username.filter(|_| save) {
        Some(username) => {
            let history = state.history().clone();
            let (username, filename) = (username.to_string(), video_filename.to_string());
            let (fertility, recommendation) = (result.fertility_percentage, result.recommendation.clone());
            let saved = tokio::task::spawn_blocking(move || {
                history.save_prediction(&username, &filename, fertility, &recommendation)
            })
            .await
            .map_err(|e| analyze_error((StatusCode::INTERNAL_SERVER_ERROR, format!("写入历史记录失败: {}", e))))?;
            let record = saved.map_err(|e| {
                error!("写入历史记录失败: {}", e);
                analyze_error((StatusCode::INTERNAL_SERVER_ERROR, format!("写入历史记录失败: {}", e)))
            })?;
            Some(record)
        }
        None => None,
    };

    info!(
        "分析完成: {} -> {:.1}%",
        video_filename, result.fertility_percentage
    );

    Ok(ResponseJson(AnalyzeResponse {
        success: true,
        message: format!("综合生育力 {:.1}%", result.fertility_percentage),
        result: Some(result),
        record,
    }))
}

/// 健康检查 Handler
pub async fn health_check() -> &'static str {
    "OK"
}

/// 分析本地文件的请求
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// 媒体目录下的相对路径
    pub input: String,
    pub username: Option<String>,
    /// 是否写入历史（需要 username）
    pub save: Option<bool>,
}

/// 把请求中的相对路径解析到媒体目录内
///
/// 绝对路径和 `..` 在访问文件系统之前就被拒绝；符号链接解析后仍需位于媒体目录内。
/// 不存在的文件只返回笼统的 404，不回显路径。
fn resolve_media_path(media_dir: &Path, input: &str) -> Result<PathBuf, (StatusCode, String)> {
    let forbidden = || (StatusCode::FORBIDDEN, "只能分析媒体目录内的视频".to_string());
    let not_found = || (StatusCode::NOT_FOUND, "视频文件不存在".to_string());

    let relative = Path::new(input);
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if input.trim().is_empty() || !plain {
        return Err(forbidden());
    }

    let root = media_dir.canonicalize().map_err(|e| {
        error!("媒体目录不可用: {}: {}", media_dir.display(), e);
        not_found()
    })?;
    let path = root.join(relative).canonicalize().map_err(|_| not_found())?;
    if !path.starts_with(&root) {
        warn!("拒绝媒体目录之外的路径: {}", input);
        return Err(forbidden());
    }
    if !path.is_file() {
        return Err(not_found());
    }
    Ok(path)
}

/// 分析媒体目录内视频的 Handler
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> AnalyzeReply {
    info!("收到分析请求: {:?}", request);

    let input_path = resolve_media_path(&state.config.media_dir, &request.input).map_err(analyze_error)?;

    let video_filename = display_name(&input_path, "video.mp4");
    let simulation = state.config.simulation.clone();
    run_analysis(
        &state,
        input_path,
        &video_filename,
        request.username.as_deref(),
        request.save.unwrap_or(false),
        simulation,
    )
    .await
}

/// 上传接口的查询参数
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub username: Option<String>,
    pub filename: Option<String>,
    /// `upload` 时按用户已有上传次数决定模拟概率
    pub policy: Option<String>,
}

/// 请求体按块写入文件，返回写入的字节数；超过 `limit` 时中止
async fn stream_to_file(body: Body, path: &Path, limit: u64) -> Result<u64, (StatusCode, String)> {
    let internal = |e: std::io::Error| {
        error!("保存上传文件失败: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("保存上传文件失败: {}", e))
    };

    let mut file = tokio::fs::File::create(path).await.map_err(internal)?;
    let mut stream = body.into_data_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| (StatusCode::BAD_REQUEST, format!("读取上传内容失败: {}", e)))?;
        written += chunk.len() as u64;
        if written > limit {
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("上传文件超过 {} 字节上限", limit),
            ));
        }
        file.write_all(&chunk).await.map_err(internal)?;
    }
    file.flush().await.map_err(internal)?;
    Ok(written)
}

/// 上传视频（请求体为原始文件内容）并分析
pub async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Body,
) -> AnalyzeReply {
    let video_filename = params
        .filename
        .as_deref()
        .map(|name| display_name(Path::new(name), "video.mp4"))
        .unwrap_or_else(|| "video.mp4".to_string());
    info!("收到上传: {}, 用户: {:?}", video_filename, params.username);

    let temp_dir = std::env::temp_dir().join("fertility-monitor");
    let video_path = temp_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), video_filename));
    if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
        error!("创建临时目录失败: {}", e);
        return Err(analyze_error((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("保存上传文件失败: {}", e),
        )));
    }

    let reply = match stream_to_file(body, &video_path, state.upload_limit).await {
        Ok(0) => Err(analyze_error((StatusCode::BAD_REQUEST, "上传内容为空".to_string()))),
        Ok(size) => {
            info!("上传已写入临时文件: {} ({} 字节)", video_path.display(), size);
            let simulation = match params.policy.as_deref() {
                Some("upload") => {
                    let prior = params
                        .username
                        .as_deref()
                        .map(|u| state.history().user_history(u).len())
                        .unwrap_or(0);
                    SimulationConfig::for_upload_count(prior)
                }
                _ => state.config.simulation.clone(),
            };
            run_analysis(
                &state,
                video_path.clone(),
                &video_filename,
                params.username.as_deref(),
                true,
                simulation,
            )
            .await
        }
        Err(e) => Err(analyze_error(e)),
    };

    if let Err(e) = tokio::fs::remove_file(&video_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("删除临时文件失败: {}: {}", video_path.display(), e);
        }
    }

    reply
}

/// 仅保留文件名部分
fn display_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// 按用户过滤的查询参数
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub username: Option<String>,
}

/// 查询历史记录
pub async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ResponseJson<Vec<PredictionRecord>> {
    let history = state.history();
    ResponseJson(match query.username {
        Some(username) => history.user_history(&username),
        None => history.load_history(),
    })
}

/// 简单的成功/失败消息
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// 清空历史记录
pub async fn handle_clear_history(
    State(state): State<AppState>,
) -> Result<ResponseJson<MessageResponse>, (StatusCode, String)> {
    state.history().clear_history().map_err(|e| {
        error!("清空历史记录失败: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("清空历史记录失败: {}", e))
    })?;
    info!("历史记录已清空");
    Ok(ResponseJson(MessageResponse {
        success: true,
        message: "历史记录已清空".to_string(),
    }))
}

/// 历史统计
pub async fn handle_stats(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ResponseJson<HistoryStats> {
    let history = state.history();
    let records = match query.username {
        Some(username) => history.user_history(&username),
        None => history.load_history(),
    };
    ResponseJson(HistoryStats::from_records(
        &records,
        state.config.fertility_threshold,
        Local::now().naive_local(),
    ))
}

/// 实时监测的查询参数，未给出的取默认值
#[derive(Debug, Default, Deserialize)]
pub struct MonitorQuery {
    pub username: String,
    /// 历史中的视频文件名；不给时取最近一条
    pub video: Option<String>,
    pub duration: Option<u32>,
    pub interval: Option<u32>,
    pub sensitivity: Option<u32>,
    pub threshold: Option<f64>,
    pub log_alerts: Option<bool>,
    /// 固定种子时结果可复现
    pub seed: Option<u64>,
}

/// 基于用户的一条历史预测模拟实时监测
pub async fn handle_monitor(
    State(state): State<AppState>,
    Query(query): Query<MonitorQuery>,
) -> Result<ResponseJson<MonitorSession>, (StatusCode, String)> {
    let records = state.history().user_history(&query.username);
    let record = select_record(&records, query.video.as_deref()).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("用户 {} 没有可用于监测的分析记录", query.username),
        )
    })?;

    let defaults = MonitorSettings::with_threshold(state.config.fertility_threshold);
    let settings = MonitorSettings {
        duration_minutes: query.duration.unwrap_or(defaults.duration_minutes),
        update_interval: query.interval.unwrap_or(defaults.update_interval),
        sensitivity: query.sensitivity.unwrap_or(defaults.sensitivity),
        alert_threshold: query.threshold.unwrap_or(defaults.alert_threshold),
        log_alerts: query.log_alerts.unwrap_or(defaults.log_alerts),
    };
    let mut rng = match query.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    run_monitor(record, settings, Local::now().naive_local(), &mut rng)
        .map(ResponseJson)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("监测参数无效: {}", e)))
}

/// 注册 / 登录请求
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// 登录结果
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub is_admin: bool,
}

/// 注册新用户
pub async fn handle_register(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<ResponseJson<MessageResponse>, (StatusCode, String)> {
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "用户名和密码不能为空".to_string()));
    }

    let created = state
        .users()
        .register_user(&credentials.username, &credentials.password)
        .map_err(|e| {
            error!("注册用户失败: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("注册用户失败: {}", e))
        })?;

    if !created {
        return Err((StatusCode::CONFLICT, format!("用户已存在: {}", credentials.username)));
    }

    Ok(ResponseJson(MessageResponse {
        success: true,
        message: format!("注册成功: {}", credentials.username),
    }))
}

/// 校验用户名和密码
pub async fn handle_login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<ResponseJson<LoginResponse>, (StatusCode, String)> {
    let users = state.users();
    if !users.authenticate_user(&credentials.username, &credentials.password) {
        warn!("登录失败: {}", credentials.username);
        return Err((StatusCode::UNAUTHORIZED, "用户名或密码错误".to_string()));
    }

    Ok(ResponseJson(LoginResponse {
        success: true,
        message: format!("欢迎, {}", credentials.username),
        is_admin: users.is_admin(&credentials.username),
    }))
}

/// 管理员接口：密码错误 401，非管理员 403
fn require_admin(state: &AppState, credentials: &Credentials) -> Result<(), (StatusCode, String)> {
    let users = state.users();
    if !users.authenticate_user(&credentials.username, &credentials.password) {
        return Err((StatusCode::UNAUTHORIZED, "用户名或密码错误".to_string()));
    }
    if !users.is_admin(&credentials.username) {
        warn!("非管理员访问管理接口: {}", credentials.username);
        return Err((StatusCode::FORBIDDEN, "需要管理员权限".to_string()));
    }
    Ok(())
}

/// 用户概览（管理员）
pub async fn handle_admin_users(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<ResponseJson<Vec<UserSummary>>, (StatusCode, String)> {
    require_admin(&state, &credentials)?;
    Ok(ResponseJson(user_overview(
        &state.users().list_users(),
        &state.history().load_history(),
        state.config.fertility_threshold,
    )))
}

/// 全部预测记录导出为 CSV（管理员）
pub async fn handle_admin_export(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<([(header::HeaderName, &'static str); 1], String), (StatusCode, String)> {
    require_admin(&state, &credentials)?;
    let records = state.history().load_history();
    info!("📥 管理员 {} 导出系统数据: {} 条", credentials.username, records.len());
    Ok((
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        system_data_csv(&records),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    fn state(dir: &Path) -> AppState {
        AppState::new(AppConfig {
            history_file: dir.join("history.json"),
            users_file: dir.join("users.json"),
            media_dir: dir.join("media"),
            ..AppConfig::default()
        })
    }

    fn credentials(username: &str, password: &str) -> Json<Credentials> {
        Json(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn analyze_request(input: &str) -> Json<AnalyzeRequest> {
        Json(AnalyzeRequest {
            input: input.to_string(),
            username: None,
            save: None,
        })
    }

    fn upload_params(username: &str, filename: &str) -> Query<UploadParams> {
        Query(UploadParams {
            username: Some(username.to_string()),
            filename: Some(filename.to_string()),
            policy: Some("upload".to_string()),
        })
    }

    #[test]
    fn test_display_name_strips_directories() {
        assert_eq!(display_name(Path::new("../../etc/cow.mp4"), "x"), "cow.mp4");
        assert_eq!(display_name(Path::new(""), "video.mp4"), "video.mp4");
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let ok = handle_register(State(state.clone()), credentials("bob", "pw")).await;
        assert!(ok.is_ok());
        let dup = handle_register(State(state.clone()), credentials("bob", "pw")).await;
        assert_eq!(dup.unwrap_err().0, StatusCode::CONFLICT);

        let login = handle_login(State(state.clone()), credentials("bob", "pw")).await.unwrap();
        assert!(login.0.success);
        assert!(!login.0.is_admin);

        let bad = handle_login(State(state), credentials("bob", "nope")).await;
        assert_eq!(bad.unwrap_err().0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let store = state.history();
        store.save_prediction("a", "1.mp4", 90.0, "r").unwrap();
        store.save_prediction("b", "2.mp4", 50.0, "r").unwrap();

        let all = handle_history(State(state.clone()), Query(UserQuery { username: None })).await;
        assert_eq!(all.0.len(), 2);

        let stats = handle_stats(
            State(state.clone()),
            Query(UserQuery { username: Some("a".to_string()) }),
        )
        .await;
        assert_eq!(stats.0.total_predictions, 1);
        assert_eq!(stats.0.high_fertility_count, 1);
        assert_eq!(stats.0.last_7_days, 1);

        handle_clear_history(State(state.clone())).await.unwrap();
        let all = handle_history(State(state), Query(UserQuery { username: None })).await;
        assert!(all.0.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_through_shared_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let tasks: Vec<_> = (0..16)
            .map(|t| {
                let history = state.history().clone();
                tokio::task::spawn_blocking(move || {
                    for i in 0..10 {
                        history
                            .save_prediction(&format!("farmer{}", t), &format!("{}.mp4", i), 70.0, "r")
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let all = handle_history(State(state), Query(UserQuery { username: None })).await;
        assert_eq!(all.0.len(), 160);
    }

    #[tokio::test]
    async fn test_analyze_is_confined_to_media_dir() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(dir.path().join("secret.mp4"), b"outside").unwrap();
        std::fs::write(media.join("notes.mp4"), b"not a video").unwrap();
        let state = state(dir.path());

        for input in ["../secret.mp4", "/etc/passwd", "", "a/../../secret.mp4"] {
            let err = handle_analyze(State(state.clone()), analyze_request(input)).await.unwrap_err();
            assert_eq!(err.0, StatusCode::FORBIDDEN, "input {:?}", input);
        }

        let err = handle_analyze(State(state.clone()), analyze_request("missing.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert!(!err.1 .0.message.contains("missing.mp4"));
        assert!(!err.1 .0.success);

        // 目录内的文件才会被交给解码器
        let err = handle_analyze(State(state), analyze_request("./notes.mp4")).await.unwrap_err();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_media_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(dir.path().join("secret.mp4"), b"outside").unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret.mp4"), media.join("link.mp4")).unwrap();

        let err = resolve_media_path(&media, "link.mp4").unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_analyze_clip_in_media_dir() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(media.join("barn")).unwrap();
        crate::video_processor::test_clip::write_gray_clip(&media.join("barn").join("cow.mkv"), 13, 9, 10, 10);
        let state = state(dir.path());

        let request = Json(AnalyzeRequest {
            input: "barn/cow.mkv".to_string(),
            username: Some("farmer1".to_string()),
            save: Some(true),
        });
        let reply = handle_analyze(State(state.clone()), request).await.unwrap();
        assert!(reply.0.success);
        assert_eq!(reply.0.record.unwrap().video_filename, "cow.mkv");
        assert_eq!(state.history().user_history("farmer1").len(), 1);
    }

    #[tokio::test]
    async fn test_upload_undecodable_body() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let err = handle_upload(State(state.clone()), upload_params("a", "cow.mp4"), Body::from("not a video"))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.1 .0.message, "analysis failed");
        assert!(state.history().load_history().is_empty());
    }

    #[tokio::test]
    async fn test_upload_empty_and_oversized_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path()).with_upload_limit(8);

        let err = handle_upload(State(state.clone()), upload_params("a", "cow.mp4"), Body::empty())
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"12345")), Ok(Bytes::from_static(b"67890"))];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        let err = handle_upload(State(state), upload_params("a", "cow.mp4"), body)
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_upload_streams_chunked_clip() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("cow.mkv");
        crate::video_processor::test_clip::write_gray_clip(&clip, 13, 9, 10, 10);
        let content = std::fs::read(&clip).unwrap();

        // 小块发送，按块写盘
        let chunks: Vec<Result<Bytes, std::io::Error>> = content
            .chunks(97)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let state = state(dir.path());
        let reply = handle_upload(State(state.clone()), upload_params("farmer1", "cow.mkv"), body)
            .await
            .unwrap();
        assert!(reply.0.success);
        assert_eq!(state.history().user_history("farmer1").len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_route() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let query = || MonitorQuery {
            username: "farmer1".to_string(),
            duration: Some(1),
            interval: Some(6),
            seed: Some(11),
            ..MonitorQuery::default()
        };
        let err = handle_monitor(State(state.clone()), Query(query())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        state.history().save_prediction("farmer1", "a.mp4", 84.0, "breed").unwrap();
        state.history().save_prediction("farmer1", "b.mp4", 40.0, "wait").unwrap();

        let latest = handle_monitor(State(state.clone()), Query(query())).await.unwrap().0;
        assert_eq!(latest.video_filename, "b.mp4");
        assert_eq!(latest.readings.len(), 10);
        assert_eq!(latest.settings.alert_threshold, 80.0);

        let picked = handle_monitor(
            State(state.clone()),
            Query(MonitorQuery {
                video: Some("a.mp4".to_string()),
                ..query()
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(picked.base_fertility, 84.0);
        let again = handle_monitor(
            State(state),
            Query(MonitorQuery {
                video: Some("a.mp4".to_string()),
                ..query()
            }),
        )
        .await
        .unwrap()
        .0;
        let scores = |s: &MonitorSession| s.readings.iter().map(|r| r.fertility).collect::<Vec<_>>();
        assert_eq!(scores(&picked), scores(&again));
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.users().initialize_demo_users().unwrap();
        state.history().save_prediction("farmer1", "a.mp4", 85.0, "breed").unwrap();

        let denied = handle_admin_users(State(state.clone()), credentials("farmer1", "demo123")).await;
        assert_eq!(denied.unwrap_err().0, StatusCode::FORBIDDEN);
        let wrong = handle_admin_export(State(state.clone()), credentials("admin", "nope")).await;
        assert_eq!(wrong.unwrap_err().0, StatusCode::UNAUTHORIZED);

        let users = handle_admin_users(State(state.clone()), credentials("admin", "admin123"))
            .await
            .unwrap()
            .0;
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].username, "farmer1");
        assert_eq!(users[1].total_predictions, 1);
        assert_eq!(users[1].high_alerts, 1);

        let (headers, csv) = handle_admin_export(State(state), credentials("admin", "admin123"))
            .await
            .unwrap();
        assert_eq!(headers[0].1, "text/csv; charset=utf-8");
        assert!(csv.starts_with("timestamp,username,video_filename,fertility_percentage,recommendation\n"));
        assert!(csv.contains(",farmer1,a.mp4,85.0,breed\n"));
    }
}

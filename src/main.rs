use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use fertility_monitor::monitor::{run_monitor, select_record, MonitorSettings};
use fertility_monitor::report::{
    alert_log_csv, monitoring_csv, system_data_csv, user_overview, user_overview_csv,
};
use fertility_monitor::{
    analyze_video, AppConfig, ConfigLoader, DetailedReport, HistoryStats, HistoryStore,
    RawSimulation, UserStore,
};
use rand::{rngs::StdRng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// 奶牛生育力监测 - 从视频中估计发情/生育力并给出配种建议
#[derive(Parser, Debug)]
#[command(name = "fertility-monitor")]
#[command(about = "奶牛生育力监测：分析视频、记录历史、提供 HTTP 服务", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// 低生育力模拟参数，未给出时读取 LOW_FERTILITY_* 环境变量或配置文件
#[derive(clap::Args, Debug, Default)]
struct SimulationArgs {
    /// 启用按概率触发的低生育力模拟
    #[arg(long)]
    simulation_enabled: bool,

    /// 触发概率 (0.0-1.0)
    #[arg(long)]
    simulation_probability: Option<f64>,

    /// 使用系统熵源（同一视频每次结果不同）
    #[arg(long)]
    simulation_nondeterministic: bool,

    /// 覆盖后综合分数下限
    #[arg(long)]
    simulation_min: Option<f64>,

    /// 覆盖后综合分数上限
    #[arg(long)]
    simulation_max: Option<f64>,
}

impl SimulationArgs {
    fn to_raw(&self) -> RawSimulation {
        RawSimulation {
            enabled: self.simulation_enabled.then(|| "true".to_string()),
            probability: self.simulation_probability.map(|v| v.to_string()),
            nondeterministic: self.simulation_nondeterministic.then(|| "true".to_string()),
            min: self.simulation_min.map(|v| v.to_string()),
            max: self.simulation_max.map(|v| v.to_string()),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分析本地视频文件
    Analyze {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 用户名（写入历史记录时使用）
        #[arg(short, long)]
        user: Option<String>,

        /// 将结果写入历史记录
        #[arg(long)]
        save: bool,

        /// 完整结果输出为 JSON 文件
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 详细报告输出为 CSV 文件
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        simulation: SimulationArgs,
    },
    /// 查看历史记录
    History {
        #[arg(short, long)]
        user: Option<String>,
    },
    /// 历史统计
    Stats {
        #[arg(short, long)]
        user: Option<String>,
    },
    /// 清空历史记录
    ClearHistory,
    /// 基于一条历史分析模拟实时监测
    Monitor {
        #[arg(short, long)]
        user: String,

        /// 历史中的视频文件名（默认最近一条）
        #[arg(long)]
        video: Option<String>,

        /// 监测时长（分钟，1-60）
        #[arg(long, default_value_t = 15)]
        duration: u32,

        /// 读数间隔（秒，1-30）
        #[arg(long, default_value_t = 3)]
        interval: u32,

        /// 灵敏度（1-10）
        #[arg(long, default_value_t = 7)]
        sensitivity: u32,

        /// 告警阈值（50-95，默认取配置中的 fertility_threshold）
        #[arg(long)]
        threshold: Option<f64>,

        /// 不记录告警日志
        #[arg(long)]
        no_alert_log: bool,

        /// 随机种子（固定后结果可复现）
        #[arg(long)]
        seed: Option<u64>,

        /// 读数导出为 CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// 告警日志导出为 CSV
        #[arg(long)]
        alerts_csv: Option<PathBuf>,
    },
    /// 用户概览（管理员）
    Users {
        /// 导出为 CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 导出全部预测记录为 CSV（管理员）
    ExportSystem {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// 注册用户
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// 校验用户名和密码
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// 生成默认配置文件
    InitConfig {
        #[arg(short, long, default_value = "fertility-monitor.ini")]
        path: PathBuf,
    },
    /// Web 服务模式
    Serve {
        /// 监听地址（默认从环境变量 FERTILITY_SERVER_PORT 读取，如果不存在则使用 0.0.0.0:9000）
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::InitConfig { path } = &args.command {
        ConfigLoader::create_default_config(path).context("生成配置文件失败")?;
        println!("已生成配置文件: {}", path.display());
        return Ok(());
    }

    let cli_simulation = match &args.command {
        Commands::Analyze { simulation, .. } => simulation.to_raw(),
        _ => RawSimulation::default(),
    };
    let config = ConfigLoader::load_config(args.config.as_deref(), cli_simulation)
        .context("加载配置失败")?;

    // 初始化日志：RUST_LOG 优先，否则使用配置中的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let history = HistoryStore::new(&config.history_file);
    let users = UserStore::new(&config.users_file);

    match args.command {
        Commands::Analyze {
            input,
            user,
            save,
            output,
            report,
            ..
        } => {
            let sim = &config.simulation;
            println!(
                "使用配置: simulation={}, probability={:.2}, range={:.0}-{:.0}, nondeterministic={}",
                sim.enabled, sim.probability, sim.min, sim.max, sim.nondeterministic
            );

            let input_for_task = input.clone();
            let simulation = config.simulation.clone();
            let result = tokio::task::spawn_blocking(move || analyze_video(&input_for_task, &simulation))
                .await
                .context("分析任务异常退出")?
                .context("分析视频失败")?;

            println!("综合生育力: {:.1}%", result.fertility_percentage);
            println!("采样帧数: {}, 时长: {:.1}s", result.frames_analyzed, result.video_duration);
            println!(
                "应激事件: {}, 低生育力事件: {}",
                result.distress_indicators.len(),
                result.low_fertility_patterns.len()
            );
            println!("{}", result.recommendation);

            if save {
                let username = user.as_deref().context("写入历史记录需要 --user")?;
                let video_filename = input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| input.display().to_string());
                history
                    .save_prediction(
                        username,
                        &video_filename,
                        result.fertility_percentage,
                        &result.recommendation,
                    )
                    .context("写入历史记录失败")?;
                println!("已写入历史记录: {}", history.path().display());
            }

            if let Some(output) = output {
                write_file(&output, &serde_json::to_string_pretty(&result)?)?;
                println!("结果已写入: {}", output.display());
            }

            if let Some(report) = report {
                write_file(&report, &DetailedReport::from_result(&result).to_csv())?;
                println!("报告已写入: {}", report.display());
            }
        }
        Commands::History { user } => {
            let records = match user {
                Some(user) => history.user_history(&user),
                None => history.load_history(),
            };
            if records.is_empty() {
                println!("暂无历史记录");
            }
            for r in records {
                println!(
                    "{}  {:<12} {:<24} {:>5.1}%  {}",
                    r.timestamp, r.username, r.video_filename, r.fertility_percentage, r.recommendation
                );
            }
        }
        Commands::Stats { user } => {
            let records = match user {
                Some(user) => history.user_history(&user),
                None => history.load_history(),
            };
            let stats =
                HistoryStats::from_records(&records, config.fertility_threshold, Local::now().naive_local());
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::ClearHistory => {
            history.clear_history().context("清空历史记录失败")?;
            println!("历史记录已清空");
        }
        Commands::Monitor {
            user,
            video,
            duration,
            interval,
            sensitivity,
            threshold,
            no_alert_log,
            seed,
            csv,
            alerts_csv,
        } => {
            let records = history.user_history(&user);
            let record = select_record(&records, video.as_deref())
                .with_context(|| format!("用户 {} 没有可用于监测的分析记录", user))?;
            let settings = MonitorSettings {
                duration_minutes: duration,
                update_interval: interval,
                sensitivity,
                alert_threshold: threshold.unwrap_or(config.fertility_threshold),
                log_alerts: !no_alert_log,
            };
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let session = run_monitor(record, settings, Local::now().naive_local(), &mut rng)
                .context("监测参数无效")?;

            for r in &session.readings {
                println!(
                    "{:>5}s  {}  {:>5.1}%  {:<14} {}",
                    r.time,
                    r.timestamp,
                    r.fertility,
                    r.level.status(),
                    r.trend.label()
                );
            }
            if let Some(summary) = &session.summary {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }

            if let Some(csv) = csv {
                write_file(&csv, &monitoring_csv(&session.readings))?;
                println!("监测数据已写入: {}", csv.display());
            }
            if let Some(alerts_csv) = alerts_csv {
                write_file(&alerts_csv, &alert_log_csv(&session.alerts))?;
                println!("告警日志已写入: {}", alerts_csv.display());
            }
        }
        Commands::Users { output } => {
            let rows = user_overview(&users.list_users(), &history.load_history(), config.fertility_threshold);
            if rows.is_empty() {
                println!("暂无用户");
            }
            for u in &rows {
                println!(
                    "{:<12} {:<6} {}  {:>4} 次  平均 {:>5.1}%  高生育力 {}",
                    u.username, u.role, u.created, u.total_predictions, u.average_fertility, u.high_alerts
                );
            }
            if let Some(output) = output {
                write_file(&output, &user_overview_csv(&rows))?;
                println!("用户概览已写入: {}", output.display());
            }
        }
        Commands::ExportSystem { output } => {
            let records = history.load_history();
            write_file(&output, &system_data_csv(&records))?;
            println!("已导出 {} 条记录: {}", records.len(), output.display());
        }
        Commands::Register { username, password } => {
            if users.register_user(&username, &password).context("注册用户失败")? {
                println!("注册成功: {}", username);
            } else {
                anyhow::bail!("用户已存在: {}", username);
            }
        }
        Commands::Login { username, password } => {
            users.initialize_demo_users().context("初始化演示账号失败")?;
            if !users.authenticate_user(&username, &password) {
                anyhow::bail!("用户名或密码错误");
            }
            let role = if users.is_admin(&username) { "admin" } else { "user" };
            println!("登录成功: {} ({})", username, role);
        }
        Commands::InitConfig { .. } => {}
        Commands::Serve { bind } => {
            // 优先使用命令行参数，其次使用环境变量 FERTILITY_SERVER_PORT，最后使用默认值 9000
            let bind_addr = bind.unwrap_or_else(|| {
                std::env::var("FERTILITY_SERVER_PORT")
                    .map(|port| format!("0.0.0.0:{}", port))
                    .unwrap_or_else(|_| "0.0.0.0:9000".to_string())
            });
            users.initialize_demo_users().context("初始化演示账号失败")?;
            start_web_server(&bind_addr, config).await?;
        }
    }

    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("创建目录失败: {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("写入文件失败: {}", path.display()))
}

async fn start_web_server(bind: &str, config: AppConfig) -> Result<()> {
    use axum::{
        routing::{get, post},
        Router,
    };
    use fertility_monitor::handler::{self, AppState};
    use tower_http::cors::CorsLayer;

    let media_dir = config.media_dir.display().to_string();
    let app = Router::new()
        .route("/", get(handler::health_check))
        .route("/health", get(handler::health_check))
        .route("/analyze", post(handler::handle_analyze))
        .route("/upload", post(handler::handle_upload))
        .route(
            "/history",
            get(handler::handle_history).delete(handler::handle_clear_history),
        )
        .route("/stats", get(handler::handle_stats))
        .route("/monitor", get(handler::handle_monitor))
        .route("/register", post(handler::handle_register))
        .route("/login", post(handler::handle_login))
        .route("/admin/users", post(handler::handle_admin_users))
        .route("/admin/export", post(handler::handle_admin_export))
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET    http://{}/health", bind);
    tracing::info!("  • 本地分析: POST   http://{}/analyze (媒体目录: {})", bind, media_dir);
    tracing::info!("  • 上传分析: POST   http://{}/upload?username=<name>&filename=<file>", bind);
    tracing::info!("  • 历史记录: GET    http://{}/history?username=<name>", bind);
    tracing::info!("  • 清空历史: DELETE http://{}/history", bind);
    tracing::info!("  • 历史统计: GET    http://{}/stats?username=<name>", bind);
    tracing::info!("  • 实时监测: GET    http://{}/monitor?username=<name>&video=<file>", bind);
    tracing::info!("  • 注册登录: POST   http://{}/register, /login", bind);
    tracing::info!("  • 管理接口: POST   http://{}/admin/users, /admin/export", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}

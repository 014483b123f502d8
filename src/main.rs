mod client;
mod collectors;
mod config;
mod http;
mod metrics;
mod report;
mod store;

use axum::serve;
use chrono::Utc;
use clap::{Parser, Subcommand};
use client::{ClientError, RemoteClient};
use collectors::system::SystemProducer;
use collectors::{ProducerError, ScanScope, SnapshotProducer};
use config::{Config, ConfigError};
use metrics::Metrics;
use serde_json::Value;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{ResultStore, StoreError};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostscan")]
#[command(version, about = "Снимки телеметрии хоста: хранилище результатов и HTTP API")]
struct Cli {
    /// Путь к YAML-конфигурации; без него используются значения по умолчанию
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Переопределяет `listen` из конфигурации
    #[arg(long, global = true)]
    listen: Option<String>,
    /// Переопределяет `results_dir` из конфигурации
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Запустить HTTP-сервер (по умолчанию)
    Serve,
    /// Локальное сканирование без сервера
    Scan {
        /// Одна категория вместо полного снимка
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Записать снимок в JSON-файл
        #[arg(long)]
        json: Option<PathBuf>,
        /// Записать Markdown-отчёт
        #[arg(long)]
        markdown: Option<PathBuf>,
        /// Сохранить результат в локальное хранилище
        #[arg(long)]
        save: bool,
    },
    /// Управление удалённым сервером
    Remote {
        /// Переопределяет `client.base_url`
        #[arg(long)]
        url: Option<String>,
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand, Debug)]
enum RemoteAction {
    Health,
    Scan {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        scan_type: Option<String>,
    },
    Get {
        id: String,
    },
    Summary {
        id: String,
    },
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    Delete {
        id: String,
    },
    Stats,
    Download {
        id: String,
        /// Файл назначения; по умолчанию имя из ответа сервера
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    Apis,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("не удалось инициализировать метрики: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("фоновая задача прервана: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("ошибка сериализации JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        AppError::Io {
            context: context.into(),
            source,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::Scan {
            category,
            name,
            json,
            markdown,
            save,
        } => {
            run_local_scan(
                &cfg,
                category.as_deref(),
                name,
                json.as_deref(),
                markdown.as_deref(),
                save,
            )
            .await
        }
        Command::Remote { url, action } => run_remote(&cfg, url.as_deref(), action).await,
    };

    if let Err(err) = result {
        error!(error = %err, "команда завершилась ошибкой");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(listen) = &cli.listen {
        cfg.listen = listen.clone();
    }
    if let Some(dir) = &cli.results_dir {
        cfg.results_dir = dir.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn run_server(cfg: Config) -> Result<(), AppError> {
    let results_dir = cfg.results_dir.clone();
    let (store, report) =
        tokio::task::spawn_blocking(move || ResultStore::open_with_report(results_dir)).await??;
    info!(
        root = %store.root().display(),
        indexed = report.indexed,
        unreadable = report.unreadable.len(),
        stale_staging_removed = report.stale_staging_removed,
        "хранилище результатов открыто"
    );

    let metrics = Metrics::new()?;
    metrics.update_from_statistics(&store.statistics());

    // listen уже прошёл validate(), но адрес мог прийти из --listen
    let addr: SocketAddr = cfg.listen.parse().map_err(|err| {
        AppError::Config(ConfigError::Validation(format!(
            "некорректный адрес listen '{}': {err}",
            cfg.listen
        )))
    })?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::io(format!("не удалось занять {addr}"), err))?;
    let port = listener
        .local_addr()
        .map(|a| a.port())
        .unwrap_or_else(|_| cfg.listen_port());

    let app = http::build_router(http::AppState {
        store: Arc::new(store),
        producer: Arc::new(SystemProducer::new(cfg.process_top_n)),
        metrics,
        port,
        default_scan_name: cfg.default_scan_name.clone(),
    });

    info!(listen = %addr, port, "запуск hostscan");
    serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::io("ошибка HTTP-сервера", err))?;
    info!("сервер остановлен");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
        return;
    }
    info!("получен Ctrl+C, выполняется остановка");
}

async fn run_local_scan(
    cfg: &Config,
    category: Option<&str>,
    name: Option<String>,
    json_path: Option<&Path>,
    markdown_path: Option<&Path>,
    save: bool,
) -> Result<(), AppError> {
    let scope = ScanScope::parse(category)?;
    let top_n = cfg.process_top_n;
    let snapshot = tokio::task::spawn_blocking(move || SystemProducer::new(top_n).produce(scope))
        .await??;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if let Some(path) = json_path {
        write_file(path, serde_json::to_string_pretty(&snapshot)?.as_bytes())?;
        info!(path = %path.display(), "JSON сохранён");
    }
    if let Some(path) = markdown_path {
        let text = report::markdown::render_report(&snapshot, Utc::now());
        write_file(path, text.as_bytes())?;
        info!(path = %path.display(), "Markdown-отчёт сохранён");
    }
    if save {
        let root = cfg.results_dir.clone();
        let name = name.unwrap_or_else(|| cfg.default_scan_name.clone());
        let record = tokio::task::spawn_blocking(move || {
            ResultStore::open(root).and_then(|store| store.save(snapshot, &name))
        })
        .await??;
        info!(id = %record.id, storage_key = %record.storage_key, "результат сохранён локально");
    }
    Ok(())
}

async fn run_remote(cfg: &Config, url: Option<&str>, action: RemoteAction) -> Result<(), AppError> {
    let client = match url {
        Some(url) => RemoteClient::new(url, cfg.client.timeout()?)?,
        None => RemoteClient::from_config(&cfg.client)?,
    };
    info!(server = client.base_url(), "подключение к удалённому серверу");

    let output: Value = match action {
        RemoteAction::Health => client.health().await?,
        RemoteAction::Scan { name, scan_type } => {
            client.scan(name.as_deref(), scan_type.as_deref()).await?
        }
        RemoteAction::Get { id } => client.get(&id).await?,
        RemoteAction::Summary { id } => client.summary(&id).await?,
        RemoteAction::List { limit } => client.list(limit).await?,
        RemoteAction::Delete { id } => {
            let deleted = client.delete(&id).await?;
            serde_json::json!({ "id": id, "deleted": deleted })
        }
        RemoteAction::Stats => client.statistics().await?,
        RemoteAction::Apis => client.apis().await?,
        RemoteAction::Download { id, output } => {
            let (filename, bytes) = client.download(&id).await?;
            let path = output
                .or_else(|| filename.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(format!("{id}.json")));
            write_file(&path, &bytes)?;
            serde_json::json!({ "id": id, "saved_to": path.display().to_string(), "size": bytes.len() })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    fs::write(path, bytes).map_err(|err| AppError::io(format!("запись {}", path.display()), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve_without_config() {
        let cli = Cli::try_parse_from(["hostscan"]).unwrap();
        assert!(cli.command.is_none());
        let cfg = load_config(&cli).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:3388");
    }

    #[test]
    fn overrides_apply_and_are_validated() {
        let cli = Cli::try_parse_from([
            "hostscan",
            "--listen",
            "127.0.0.1:9999",
            "--results-dir",
            "/tmp/hs",
            "serve",
        ])
        .unwrap();
        let cfg = load_config(&cli).unwrap();
        assert_eq!(cfg.listen_port(), 9999);
        assert_eq!(cfg.results_dir, PathBuf::from("/tmp/hs"));

        let cli = Cli::try_parse_from(["hostscan", "--listen", "nowhere"]).unwrap();
        assert!(matches!(load_config(&cli), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn remote_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "hostscan",
            "remote",
            "--url",
            "http://10.0.0.2:3388",
            "download",
            "abc",
            "-o",
            "out.json",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Remote {
                url,
                action: RemoteAction::Download { id, output },
            }) => {
                assert_eq!(url.as_deref(), Some("http://10.0.0.2:3388"));
                assert_eq!(id, "abc");
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            other => panic!("неожиданная команда: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_scan_writes_files_and_saves() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config {
            results_dir: tmp.path().join("results"),
            ..Config::default()
        };
        let json_path = tmp.path().join("scan.json");
        let md_path = tmp.path().join("scan.md");

        run_local_scan(
            &cfg,
            Some("uptime"),
            Some("local".to_string()),
            Some(&json_path),
            Some(&md_path),
            true,
        )
        .await
        .unwrap();

        let written: Value = serde_json::from_slice(&fs::read(&json_path).unwrap()).unwrap();
        assert!(written["uptime"].is_object());
        assert!(fs::read_to_string(&md_path)
            .unwrap()
            .starts_with("# Device Information Report"));

        let store = ResultStore::open(tmp.path().join("results")).unwrap();
        let listed = store.list(None);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "local");
    }
}

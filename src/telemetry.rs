//! ログ出力の初期化
//!
//! `tracing-subscriber` の fmt サブスクライバーを設定します。
//! ファイル出力の場合は `tracing-appender` の非ブロッキングライターを使い、
//! 返されたガードが破棄されるまでログがフラッシュされます。

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogFormat, LoggingSettings};

/// サブスクライバーを初期化する
///
/// `verbose` が真なら、設定より詳細な場合を除いて `DEBUG` まで出力します。
///
/// # 戻り値
///
/// - `Ok(Some(guard))`: ファイル出力時。`main` の終了までガードを保持してください
/// - `Ok(None)`: 標準エラー出力時
pub fn init(
    settings: &LoggingSettings,
    verbose: bool,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let level = if verbose {
        settings.level.max(Level::DEBUG)
    } else {
        settings.level
    };

    let (writer, guard) = match &settings.file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| format!("ログファイルのパスが不正です: {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(writer)
        .with_ansi(settings.file.is_none());

    match settings.format {
        LogFormat::Json => builder.json().try_init()?,
        LogFormat::Pretty => builder.try_init()?,
    }

    Ok(guard)
}

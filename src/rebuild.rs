//! `catalog rebuild`: build a new version from the source file and activate it.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::extract::parse_timestamp_str;

/// Parse `--since`; accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`.
pub fn parse_since(since: &str) -> Result<DateTime<Utc>> {
    match parse_timestamp_str(since) {
        Some(ts) => Ok(ts),
        None => bail!(
            "Invalid --since value '{}'. Expected YYYY-MM-DD or an RFC 3339 timestamp.",
            since
        ),
    }
}

pub async fn run_rebuild(
    config: &Config,
    description: Option<String>,
    since: Option<String>,
) -> Result<()> {
    let since = since.as_deref().map(parse_since).transpose()?;
    let description = description.unwrap_or_else(|| match since {
        Some(ts) => format!("incremental since {}", ts.format("%Y-%m-%d %H:%M:%S")),
        None => format!("full rebuild of {}", config.source.path.display()),
    });

    let catalog = Catalog::open(config).await?;
    let started = std::time::Instant::now();

    let result = match since {
        Some(ts) => catalog.builder.rebuild_incremental(&description, ts).await,
        None => catalog.builder.rebuild(&description).await,
    };

    let version_id = match result {
        Ok(v) => v,
        Err(e) => {
            catalog.close().await;
            bail!("Rebuild failed: {}", e);
        }
    };

    println!("Rebuild complete");
    println!("  version:   {}", version_id);
    println!("  products:  {}", catalog.lexical.doc_count(&version_id));
    println!(
        "  vectors:   {} ({})",
        catalog.vector.vector_count(&version_id),
        catalog.vector.model_name()
    );
    println!("  elapsed:   {:.2}s", started.elapsed().as_secs_f64());

    catalog.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since_formats() {
        assert!(parse_since("2024-03-01").is_ok());
        assert!(parse_since("2024-03-01 10:30:00").is_ok());
        assert!(parse_since("2024-03-01T10:30:00Z").is_ok());
    }

    #[test]
    fn test_parse_since_rejects_garbage() {
        let err = parse_since("last tuesday").unwrap_err();
        assert!(err.to_string().contains("--since"));
    }
}

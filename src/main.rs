use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::json;
use zssn::logging::{log, obj, v_num, v_str, Domain, Level};
use zssn::{Config, ReportService, SqliteStore};

fn main() -> Result<()> {
    let cfg = Config::from_env();
    let store = Arc::new(SqliteStore::open(&cfg)?);
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("infection_threshold", v_num(f64::from(cfg.infection_threshold))),
        ]),
    );

    let reports = ReportService::new(store);
    let command = std::env::args().nth(1).unwrap_or_else(|| "all".to_string());
    let out = match command.as_str() {
        "survivors" => serde_json::to_value(reports.survivors()?)?,
        "infected" => serde_json::to_value(reports.infected()?)?,
        "resources" => serde_json::to_value(reports.resources()?)?,
        "lost-points" => json!({ "lost_points": reports.lost_points()? }),
        "sharing" => serde_json::to_value(reports.resource_sharing()?)?,
        "all" => json!({
            "survivors": reports.survivors()?,
            "infected": reports.infected()?,
            "resources": reports.resources()?,
            "lost_points": reports.lost_points()?,
            "resource_sharing": reports.resource_sharing()?,
        }),
        other => bail!("unknown report {other:?}; expected survivors, infected, resources, lost-points, sharing or all"),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

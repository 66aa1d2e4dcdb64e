//! `cond probe`: one pressure sample and the tier it maps to

use anyhow::{bail, Context, Result};
use conductor_config::ObserveConfig;
use conductor_observe::ObserveContext;
use serde_json::json;

pub async fn execute(config: ObserveConfig, format: String) -> Result<()> {
    let ctx = ObserveContext::builder(config)
        .build()
        .context("failed to set up logging")?;
    let (ratio, level) = ctx.probe();
    let status = ctx.controller().status();

    match format.as_str() {
        "json" => {
            let report = json!({
                "source": ctx.monitor().source_name(),
                "pressure": ratio,
                "failures": ctx.monitor().failures(),
                "tier": status,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "text" => {
            println!(
                "pressure {:.4} ({}) -> tier {} ({})",
                ratio,
                ctx.monitor().source_name(),
                level.as_u8(),
                level.name()
            );
            println!("features: {}", status.features.join(", "));
            let thresholds = ctx.controller().settings().thresholds;
            println!(
                "thresholds: {:.3} / {:.3} / {:.3}",
                thresholds[0], thresholds[1], thresholds[2]
            );
        }
        other => bail!("unknown format {other:?} (expected text or json)"),
    }
    Ok(())
}

use console::style;
use tikvpn_core::{PipelineError, RunRecord};

/// Print the connection report followed by any degraded results.
pub fn print_summary(record: &RunRecord, report: &str) {
    let divider = "=".repeat(60);

    println!("\n{divider}");
    if record.is_incomplete() {
        println!(
            "  {}",
            style("tikvpn Provisioning Complete (address not detected)").yellow()
        );
    } else {
        println!("  {}", style("tikvpn Provisioning Complete").green());
    }
    println!("{divider}");
    print!("{report}");
    println!("{divider}");

    if !record.warnings.is_empty() {
        println!("  {}", style("Completed with warnings:").yellow().bold());
        for warning in &record.warnings {
            println!("    - {warning}");
        }
        println!("{divider}");
    }

    println!("  Report saved to:   {}", record.report_path.display());
    println!("  Run record:        {}/runs/{}.json", state_dir(record), record.id);
    println!("{divider}\n");
}

/// Print a fatal pipeline failure with the stage-specific hint.
pub fn print_failure(err: &PipelineError) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("error:").red().bold(),
        style(format!("stage {} ({}) failed", err.stage.number(), err.stage)).bold()
    );
    eprintln!("  cause: {}", err.source);
    eprintln!("  next:  {}", err.hint);
}

fn state_dir(record: &RunRecord) -> String {
    record
        .report_path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ".".into())
}

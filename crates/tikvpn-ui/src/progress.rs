use console::style;
use tikvpn_core::Stage;

/// Print the `[Step n/8]` header for a pipeline stage.
pub fn stage(stage: Stage, msg: &str) {
    println!(
        "\n{} {msg}",
        style(format!("[Step {}/{}]", stage.number(), Stage::COUNT)).bold()
    );
}

/// Indented detail line under the current stage.
pub fn detail(msg: &str) {
    println!("  {msg}");
}

/// Indented line for work that was already done on a previous run.
pub fn skipped(msg: &str) {
    println!("  {} {msg}", style("=").dim());
}

pub fn warn(msg: &str) {
    println!("  {} {msg}", style("!").yellow().bold());
}

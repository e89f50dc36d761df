mod progress;
mod styling;
mod summary;
mod tables;

pub use progress::PhaseProgress;
pub use styling::{bright_green, dim, magenta_bold};
pub use summary::print_summary;

/// Prints the `adoscan` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🔍 adoscan"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Azure DevOps Authorization & Exposure Scanner")
    );
}

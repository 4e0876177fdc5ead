use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Color};
use clap::builder::styling::{Style, Styles};
use clap::{ColorChoice, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "primer-finder",
    version = env!("CARGO_PKG_VERSION"),
    about = "Find degenerate primer pairs in specimen sequences and decide \
             the reading frame of the amplified region",
    color = ColorChoice::Always,
    styles = get_styles(),
)]
pub struct Args {
    /// Configuration file path (JSON); the built-in default is used when
    /// omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Input store path; a .db suffix selects the relational specimen store,
    /// .fasta/.fa/.fna (optionally .gz) a flat sequence file
    #[arg(short, long)]
    pub input: Option<String>,

    /// Specimen table override for database inputs
    #[arg(long)]
    pub table_name: Option<String>,

    /// Run the primer pass (default when no pass is selected anywhere)
    #[arg(long, default_value_t = false)]
    pub find_primers: bool,

    /// Run the ORF pass
    #[arg(long, default_value_t = false)]
    pub find_orfs: bool,

    /// Log file path
    #[arg(long)]
    pub log: Option<String>,

    /// Log level (10 debug, 20 info, 30 warn, 40 error)
    #[arg(long)]
    pub log_level: Option<i64>,
}

pub fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .invalid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .valid(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::White))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_defaults() {
        let args = Args::parse_from(["primer-finder"]);
        assert!(args.config.is_none());
        assert!(!args.find_primers);
        assert!(!args.find_orfs);
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::parse_from([
            "primer-finder",
            "--config",
            "conf.json",
            "--input",
            "specimens.db",
            "--table-name",
            "specimen",
            "--find-primers",
            "--find-orfs",
            "--log",
            "run.log",
            "--log-level",
            "10",
        ]);
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("conf.json")));
        assert_eq!(args.input.as_deref(), Some("specimens.db"));
        assert_eq!(args.table_name.as_deref(), Some("specimen"));
        assert!(args.find_primers);
        assert!(args.find_orfs);
        assert_eq!(args.log.as_deref(), Some("run.log"));
        assert_eq!(args.log_level, Some(10));
    }
}

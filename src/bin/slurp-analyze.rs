#![forbid(unsafe_code)]
//! Relationship analysis from the command line

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use slurp::config::{load_config_from, DEFAULT_CONFIG_PATH};
use slurp::provider;
use slurp::relationships::{
    AddressAnalysis, ConnectionType, OwnershipReport, OwnershipStrength, RelationshipAnalyzer,
    RiskLevel,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Transactions fetched per address (overrides the config)
    #[arg(long)]
    max_transactions: Option<usize>,
    /// Print the raw JSON report instead of tables
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Counterparties, clusters and risk score of one address
    Address {
        address: String,
    },
    /// Shared counterparties and timing correlation across addresses
    Owners {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config_from(&cli.config)?;
    let provider = provider::from_config(&config.provider)?;
    let analyzer = RelationshipAnalyzer::new(
        provider,
        cli.max_transactions
            .unwrap_or(config.analyzer.max_transactions),
        config.analyzer.max_addresses,
    )
    .with_network(config.provider.network);

    match &cli.command {
        Commands::Address { address } => {
            let analysis = analyzer.analyze(address).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print_analysis(&analysis);
            }
        }
        Commands::Owners { addresses } => {
            let report = analyzer.analyze_many(addresses).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).fg(TableColor::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table(titles: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(titles));
    table
}

fn shorten(address: &str) -> String {
    if address.len() > 40 {
        format!("{}...{}", &address[..20], &address[address.len() - 12..])
    } else {
        address.to_string()
    }
}

fn risk_color(level: RiskLevel) -> TableColor {
    match level {
        RiskLevel::Low => TableColor::Green,
        RiskLevel::Medium => TableColor::Yellow,
        RiskLevel::High => TableColor::Red,
    }
}

fn format_time(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| unix.to_string())
}

fn print_analysis(analysis: &AddressAnalysis) {
    println!();
    println!("{}", format!("📍 {}", analysis.address).bright_cyan().bold());
    println!(
        "{}",
        format!(
            "   {} transactions, {} counterparties",
            analysis.transaction_count,
            analysis.connections.len()
        )
        .cyan()
    );
    println!();

    if analysis.connections.is_empty() {
        println!("{}", "📭 No counterparties found".yellow());
    } else {
        let mut table = new_table(&["Counterparty", "Strength", "Type", "First seen", "Last seen"]);
        for connection in &analysis.connections {
            let direction = match connection.connection_type {
                ConnectionType::Incoming => "📥 incoming",
                ConnectionType::Outgoing => "📤 outgoing",
                ConnectionType::Bidirectional => "↔️  both",
            };
            table.add_row(vec![
                Cell::new(shorten(&connection.target)).fg(TableColor::White),
                Cell::new(connection.strength),
                Cell::new(direction),
                Cell::new(format_time(connection.first_seen)).fg(TableColor::Grey),
                Cell::new(format_time(connection.last_seen)).fg(TableColor::Grey),
            ]);
        }
        println!("{}", table);
        println!();

        let mut clusters = new_table(&["Tier", "Risk", "Members"]);
        for cluster in &analysis.clusters {
            clusters.add_row(vec![
                Cell::new(format!("{:?}", cluster.tier)),
                Cell::new(format!("{:?}", cluster.risk)).fg(risk_color(cluster.risk)),
                Cell::new(cluster.size),
            ]);
        }
        println!("{}", clusters);
        println!();
    }

    let risk = &analysis.risk;
    let line = format!("⚠️  Risk score {}/100 ({:?})", risk.score, risk.level);
    let line = match risk.level {
        RiskLevel::Low => line.green(),
        RiskLevel::Medium => line.yellow(),
        RiskLevel::High => line.red(),
    };
    println!("{}", line.bold());
    for factor in &risk.factors {
        println!("   • {}", factor);
    }
    println!();
}

fn print_report(report: &OwnershipReport) {
    for analysis in &report.analyzed {
        print_analysis(analysis);
    }

    for failure in &report.failures {
        eprintln!(
            "{}",
            format!("❌ {}: {}", shorten(&failure.address), failure.error).red()
        );
    }

    println!("{}", "🔎 Beneficial owner candidates".bright_magenta().bold());
    if report.beneficial_owners.is_empty() {
        println!("{}", "   none".yellow());
    } else {
        let mut table = new_table(&["Address", "Appearances", "Likelihood", "Strength"]);
        for candidate in &report.beneficial_owners {
            let color = match candidate.strength {
                OwnershipStrength::Strong => TableColor::Red,
                OwnershipStrength::Moderate => TableColor::Yellow,
            };
            table.add_row(vec![
                Cell::new(shorten(&candidate.address)).fg(TableColor::White),
                Cell::new(candidate.appearances),
                Cell::new(format!("{:.1}%", candidate.likelihood)).fg(color),
                Cell::new(format!("{:?}", candidate.strength)).fg(color),
            ]);
        }
        println!("{}", table);
    }
    println!();

    println!("{}", "⏱️  Timing correlations".bright_magenta().bold());
    if report.timing_correlations.is_empty() {
        println!("{}", "   none".yellow());
    } else {
        let mut table = new_table(&["Window", "Addresses", "Confidence"]);
        for group in &report.timing_correlations {
            let members: Vec<String> = group.addresses.iter().map(|a| shorten(a)).collect();
            table.add_row(vec![
                Cell::new(format_time(group.window_start)).fg(TableColor::Grey),
                Cell::new(members.join("\n")),
                Cell::new(format!("{:.1}%", group.confidence)),
            ]);
        }
        println!("{}", table);
    }
    println!();
}

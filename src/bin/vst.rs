//! VST Protocol CLI
//!
//! Calculators for the issuance curve and liquidation split, configuration
//! management and a scripted in-memory demo.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use console::{style, Term};

use vst::core::collateral::CollateralParams;
use vst::core::config::ProtocolConfig;
use vst::issuance::schedule::issuance_fraction;
use vst::liquidation::engine::{compute_liquidation_split, LiquidationReport};
use vst::oracle::price_feed::StaticPriceFeed;
use vst::protocol::state_machine::ProtocolStateMachine;
use vst::utils::clock::{Clock, ManualClock};
use vst::utils::constants::{DECIMAL_PRECISION, DEFAULT_HALVING_MINUTES};
use vst::utils::crypto::Address;
use vst::utils::math::{format_amount, FixedPoint};

/// VST Protocol CLI - multi-collateral stablecoin core
#[derive(Parser)]
#[command(name = "vst")]
#[command(author = "VST Protocol Team")]
#[command(version = vst::VERSION)]
#[command(about = "Command-line tools for the VST protocol core", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cumulative issuance after a number of minutes
    Issuance {
        /// Supply cap, in whole tokens (decimals allowed)
        #[arg(short, long, value_parser = parse_amount)]
        cap: u128,

        /// Minutes since the schedule started
        #[arg(short, long)]
        minutes: u64,

        /// Half-life of the curve in minutes
        #[arg(long, default_value_t = DEFAULT_HALVING_MINUTES)]
        halving_minutes: u64,
    },

    /// Split a trove's collateral as a liquidation would
    Split {
        /// Trove collateral
        #[arg(long, value_parser = parse_amount)]
        coll: u128,

        /// Trove debt
        #[arg(long, value_parser = parse_amount)]
        debt: u128,

        /// Collateral price
        #[arg(long, value_parser = parse_amount)]
        price: u128,

        /// VST available in the stability pool
        #[arg(long, value_parser = parse_amount)]
        sp_deposits: u128,

        /// Liquidation bonus as a fraction, e.g. 0.05
        #[arg(long, value_parser = parse_amount)]
        bonus: Option<u128>,

        /// Stability pool bonus as a fraction
        #[arg(long, value_parser = parse_amount)]
        bonus_to_sp: Option<u128>,
    },

    /// Configuration file management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Run a scripted liquidation against an in-memory protocol
    Demo,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration
    Init {
        /// Output path
        #[arg(short, long, env = "VST_CONFIG", default_value = "vst.json")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// Configuration path; defaults plus environment when absent
        #[arg(short, long, env = "VST_CONFIG")]
        path: Option<PathBuf>,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let term = Term::stdout();

    if let Err(e) = run_command(&cli, &term) {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Issuance {
            cap,
            minutes,
            halving_minutes,
        } => cmd_issuance(*cap, *minutes, *halving_minutes, term),
        Commands::Split {
            coll,
            debt,
            price,
            sp_deposits,
            bonus,
            bonus_to_sp,
        } => cmd_split(*coll, *debt, *price, *sp_deposits, *bonus, *bonus_to_sp, term),
        Commands::Config(cmd) => cmd_config(cmd, term),
        Commands::Demo => cmd_demo(term),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_issuance(cap: u128, minutes: u64, halving_minutes: u64, term: &Term) -> anyhow::Result<()> {
    let fraction = issuance_fraction(minutes, halving_minutes)?;
    let issued = fraction.apply_to(cap)?;

    term.write_line(&format!(
        "{} Issuance after {} minutes (half-life {})",
        style("→").cyan(),
        minutes,
        halving_minutes
    ))?;
    term.write_line(&format!("  Fraction: {}", style(fraction).yellow()))?;
    term.write_line(&format!("  Raw:      {}", fraction.raw()))?;
    term.write_line(&format!(
        "  Issued:   {} of {}",
        style(format_amount(issued)).green(),
        format_amount(cap)
    ))?;
    Ok(())
}

fn cmd_split(
    coll: u128,
    debt: u128,
    price: u128,
    sp_deposits: u128,
    bonus: Option<u128>,
    bonus_to_sp: Option<u128>,
    term: &Term,
) -> anyhow::Result<()> {
    let defaults = CollateralParams::default();
    let params = CollateralParams {
        bonus: bonus.unwrap_or(defaults.bonus),
        bonus_to_sp: bonus_to_sp.unwrap_or(defaults.bonus_to_sp),
        ..defaults
    };
    params.validate()?;
    let split = compute_liquidation_split(coll, debt, price, &params, sp_deposits)?;

    term.write_line(&format!(
        "{} Liquidation split at ICR {}",
        style("→").cyan(),
        style(FixedPoint::from_raw(split.icr)).yellow()
    ))?;
    let rows = [
        ("Gas compensation", split.gas_compensation),
        ("Owner surplus", split.surplus),
        ("Collateral to SP", split.coll_to_sp),
        ("Collateral redistributed", split.coll_to_redistribute),
        ("Debt offset", split.debt_to_offset),
        ("Debt redistributed", split.debt_to_redistribute),
    ];
    for (label, value) in rows {
        term.write_line(&format!("  {:<26} {}", label, format_amount(value)))?;
    }
    Ok(())
}

fn cmd_config(cmd: &ConfigCommands, term: &Term) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Init { path, force } => {
            if path.exists() && !*force {
                anyhow::bail!(
                    "Configuration already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }
            ProtocolConfig::default().save(path)?;
            term.write_line(&format!(
                "{} Configuration written to {}",
                style("✓").green(),
                path.display()
            ))?;
        }
        ConfigCommands::Show { path } => {
            let config = load_config(path.as_deref())?;
            term.write_line(&serde_json::to_string_pretty(&config)?)?;
        }
    }
    Ok(())
}

fn cmd_demo(term: &Term) -> anyhow::Result<()> {
    let config = ProtocolConfig::default();
    let owner = config.owner;
    let clock = ManualClock::new(1_700_000_000);
    let weth = Address::from_label("weth");
    let mut feed = StaticPriceFeed::new();
    feed.set_price(weth, 100 * DECIMAL_PRECISION, clock.now())?;

    let mut sm = ProtocolStateMachine::new(config, clock.clone(), feed)?;
    let pool = sm.add_collateral(owner, weth)?;
    term.write_line(&format!(
        "{} Registered {} with stability pool {}",
        style("→").cyan(),
        weth,
        pool
    ))?;

    let bob = Address::from_label("bob");
    let alice = Address::from_label("alice");
    let keeper = Address::from_label("keeper");
    for (who, coll, vst) in [(bob, 100, 2_000), (alice, 12, 1_000)] {
        sm.credit_collateral(weth, who, coll * DECIMAL_PRECISION)?;
        sm.open_trove(who, weth, coll * DECIMAL_PRECISION, vst * DECIMAL_PRECISION)?;
    }
    sm.provide_to_stability_pool(bob, weth, 2_000 * DECIMAL_PRECISION)?;
    term.write_line(&format!(
        "  TCR {} at price 100",
        FixedPoint::from_raw(sm.tcr(&weth)?)
    ))?;

    clock.advance(600);
    let now = clock.now();
    sm.price_feed_mut().set_price(weth, 90 * DECIMAL_PRECISION, now)?;
    term.write_line(&format!(
        "{} Price drops to 90, alice ICR {}",
        style("⚠").yellow(),
        FixedPoint::from_raw(sm.current_icr(&weth, &alice)?)
    ))?;

    let report = sm.liquidate_troves(keeper, weth, 10)?;
    print_report(&report, term)?;

    term.write_line(&format!(
        "  Bob deposit {} with collateral gain {}",
        format_amount(sm.compounded_deposit(&weth, &bob)?),
        format_amount(sm.collateral_gain(&weth, &bob)?)
    ))?;
    term.write_line(&format!(
        "  Keeper received {} collateral",
        format_amount(sm.collateral_balance(&weth, &keeper))
    ))?;
    term.write_line(&format!(
        "{} {} events recorded",
        style("✓").green(),
        sm.events().total_recorded()
    ))?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_amount(s: &str) -> Result<u128, String> {
    FixedPoint::from_decimal_str(s)
        .map(|f| f.raw())
        .map_err(|e| e.to_string())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ProtocolConfig> {
    let config = match path {
        Some(path) => ProtocolConfig::load(path)?.with_env_overrides(),
        None => ProtocolConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn print_report(report: &LiquidationReport, term: &Term) -> anyhow::Result<()> {
    term.write_line(&format!(
        "{} Liquidated {} trove(s), skipped {}",
        style("✓").green(),
        report.liquidated.len(),
        report.skipped.len()
    ))?;
    for values in &report.liquidated {
        term.write_line(&format!(
            "  {} coll {} debt {} ({:?})",
            values.owner,
            format_amount(values.entire_coll),
            format_amount(values.entire_debt),
            values.outcome
        ))?;
    }
    term.write_line(&format!(
        "  Offset {} / redistributed {} / gas {}",
        format_amount(report.totals.debt_to_offset),
        format_amount(report.totals.debt_to_redistribute),
        format_amount(report.totals.gas_compensation)
    ))?;
    Ok(())
}

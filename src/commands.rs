use colored::Colorize;
use keg::colors;
use keg::download::Fetcher;
use keg::error::Result;
use keg::hooks::TestOutcome;
use keg::package_manager::{InstallOptions, PackageManager};
use keg::receipt::InstallReceipt;
use keg::resolve::{InstallPlan, PlanStep};

pub async fn install<F: Fetcher>(
    pm: &PackageManager<F>,
    name: &str,
    dry_run: bool,
    opts: &InstallOptions,
) -> Result<TestOutcome> {
    if dry_run {
        let plan = pm.plan(name)?;
        println!("Dry run mode - no packages will be installed");
        print_plan(&plan);
        return Ok(TestOutcome::Skipped);
    }

    println!("Resolving dependencies...");
    let report = pm.install(name, opts).await?;

    if report.already_installed() {
        println!("{} {} is already installed", colors::warning(), name.bold());
        return Ok(report.test);
    }

    for record in &report.installed {
        println!(
            "  {} Installed {} {}",
            colors::check(),
            record.name.bold(),
            record.version.dimmed()
        );
    }

    match &report.test {
        TestOutcome::Passed => println!("  {} Test passed", colors::check()),
        TestOutcome::Failed(detail) => {
            println!("  {} Test failed", colors::cross());
            for line in detail.lines() {
                println!("    {}", line.dimmed());
            }
        }
        TestOutcome::NotDefined | TestOutcome::Skipped => {}
    }

    println!(
        "{} Installed {} package{} in {:.1}s",
        colors::check(),
        report.installed.len().to_string().bold(),
        if report.installed.len() == 1 { "" } else { "s" },
        report.time_ms as f64 / 1000.0
    );

    Ok(report.test)
}

pub async fn test<F: Fetcher>(
    pm: &PackageManager<F>,
    name: &str,
    opts: &InstallOptions,
) -> Result<TestOutcome> {
    println!("Testing {}...", name.cyan());
    let outcome = pm.test(name, opts).await?;

    match &outcome {
        TestOutcome::Passed => println!("{} {} passed", colors::check(), name.bold()),
        TestOutcome::NotDefined => {
            println!("{} {} defines no test", colors::warning(), name.bold())
        }
        TestOutcome::Skipped => {}
        TestOutcome::Failed(detail) => {
            println!("{} {} failed", colors::cross(), name.bold());
            for line in detail.lines() {
                println!("    {}", line.dimmed());
            }
        }
    }
    Ok(outcome)
}

pub fn deps<F: Fetcher>(pm: &PackageManager<F>, name: &str) -> Result<()> {
    let plan = pm.plan(name)?;
    print_plan(&plan);
    Ok(())
}

pub fn info<F: Fetcher>(pm: &PackageManager<F>, name: &str) -> Result<()> {
    let formula = pm.info(name)?;

    println!("{}", format!("==> {}", formula.name()).bold().green());
    if let Some(desc) = formula.description() {
        println!("{}", desc);
    }
    if let Some(homepage) = formula.homepage() {
        println!("{}: {}", "Homepage".bold(), homepage);
    }
    println!("{}: {}", "Version".bold(), formula.version());
    println!("{}: {}", "Source".bold(), formula.source_url());
    println!("{}: {}", "SHA-256".bold(), formula.checksum());
    if !formula.dependencies().is_empty() {
        println!(
            "{}: {}",
            "Dependencies".bold(),
            formula.dependencies().join(", ")
        );
    }
    if formula.test_command().is_some() {
        println!("{}: yes", "Test".bold());
    }

    match pm.installed().get(name) {
        Some(record) => {
            let when = match InstallReceipt::read(&record.install_path) {
                Ok(receipt) if receipt.installed_as_dependency => "as a dependency",
                Ok(_) => "on request",
                Err(_) => "(receipt missing)",
            };
            println!(
                "{}: {} {} {}",
                "Installed".bold(),
                record.install_path.display(),
                when,
                record
                    .installed_at
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
                    .dimmed()
            );
        }
        None => println!("{}: no", "Installed".bold()),
    }
    Ok(())
}

pub fn list<F: Fetcher>(pm: &PackageManager<F>) -> Result<()> {
    let records = pm.installed().list();
    if records.is_empty() {
        println!("No packages installed");
        return Ok(());
    }
    for record in records {
        let marker = if record.installed_on_request {
            String::new()
        } else {
            format!(" {}", "(dependency)".dimmed())
        };
        println!("{} {}{}", record.name.bold(), record.version.dimmed(), marker);
    }
    Ok(())
}

pub fn cleanup<F: Fetcher>(pm: &PackageManager<F>) -> Result<()> {
    let removed = pm.cleanup()?;
    println!(
        "{} Removed {} cached download{} from {}",
        colors::check(),
        removed.to_string().bold(),
        if removed == 1 { "" } else { "s" },
        pm.config().cache_dir.display()
    );
    Ok(())
}

fn print_plan(plan: &InstallPlan) {
    println!("{}", format!("==> Install plan for {}", plan.target()).bold());
    for (i, step) in plan.steps().iter().enumerate() {
        match step {
            PlanStep::Install { formula, requested } => {
                let role = if *requested { "" } else { " (dependency)" };
                println!(
                    "  {}. {} {}{}",
                    i + 1,
                    formula.name().bold(),
                    formula.version(),
                    role.dimmed()
                );
            }
            PlanStep::Satisfied { name } => {
                println!(
                    "  {}. {} {}",
                    i + 1,
                    name,
                    "(already installed)".dimmed()
                );
            }
        }
    }
    if plan.is_noop() {
        println!("Nothing to install");
    }
}

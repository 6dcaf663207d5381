// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result};
use config::Config;
use plantdesk_app::{RecordTable, TablePreset};
use runtime::ApiRuntime;
use std::env;
use std::path::PathBuf;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `plantdesk --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;

    let table_config = config
        .table_config(options.preset.as_deref())
        .with_context(|| format!("invalid [table] config in {}", options.config_path.display()))?;
    let client = plantdesk_api::Client::new(config.endpoints()?, config.timeout()?)
        .with_context(|| {
            format!(
                "invalid [api] config in {}; fix listing_url/update_url/timeout values",
                options.config_path.display()
            )
        })?;
    if options.check_only {
        println!("config ok: {}", options.config_path.display());
        return Ok(());
    }

    logging::init_logging(config.log_level(), &config.log_file()?)?;
    tracing::info!(
        listing_url = %client.endpoints().listing_url,
        id_field = %table_config.id_field,
        "starting plantdesk"
    );

    let mut runtime = ApiRuntime::new(client, &table_config.id_field);
    let mut table = RecordTable::new(table_config);
    plantdesk_tui::run_app(&mut table, &mut runtime)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    preset: Option<String>,
    print_config_path: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        preset: None,
        print_config_path: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--preset" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("--preset requires a name (plant-ids, contacts, diff)")
                })?;
                let name = value.as_ref();
                if TablePreset::parse(name).is_none() {
                    return Err(anyhow::anyhow!(
                        "unknown preset {name:?}; expected plant-ids, contacts, or diff"
                    ));
                }
                options.preset = Some(name.to_owned());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow::anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("plantdesk");
    println!("  --config <path>          Use a specific config path");
    println!("  --preset <name>          Table preset: plant-ids, contacts, diff");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --check                  Validate config and endpoints, then exit");
    println!("  --help                   Show this help");
}

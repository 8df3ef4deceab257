// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::process::ExitCode;

use registry::error::recoverable;
use registry::{
    KeyFilter, MigrationReport, NamespaceRegistry, RegistryConfig, RegistryError, Value,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: registry <command>

commands:
  migrate                  migrate legacy layouts and print what was done
  get <ns> <key>           print the value of a key
  set <ns> <key> <json>    store a JSON value
  delete <ns> <key>        delete a key and print its previous value
  keys <ns> [prefix]       list keys
  dump <ns> [prefix]       list keys with their values
  stats                    print environment statistics";

#[derive(Debug, PartialEq)]
enum Command {
    Migrate,
    Get {
        namespace: String,
        key: String,
    },
    Set {
        namespace: String,
        key: String,
        value: Value,
    },
    Delete {
        namespace: String,
        key: String,
    },
    Keys {
        namespace: String,
        prefix: Option<String>,
    },
    Dump {
        namespace: String,
        prefix: Option<String>,
    },
    Stats,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            ["migrate"] => Self::Migrate,
            ["get", namespace, key] => Self::Get {
                namespace: (*namespace).to_string(),
                key: (*key).to_string(),
            },
            ["set", namespace, key, json] => Self::Set {
                namespace: (*namespace).to_string(),
                key: (*key).to_string(),
                value: serde_json::from_str(json)
                    .map_err(|e| format!("invalid JSON value '{json}': {e}"))?,
            },
            ["delete", namespace, key] => Self::Delete {
                namespace: (*namespace).to_string(),
                key: (*key).to_string(),
            },
            ["keys", namespace, rest @ ..] if rest.len() <= 1 => Self::Keys {
                namespace: (*namespace).to_string(),
                prefix: rest.first().map(|p| (*p).to_string()),
            },
            ["dump", namespace, rest @ ..] if rest.len() <= 1 => Self::Dump {
                namespace: (*namespace).to_string(),
                prefix: rest.first().map(|p| (*p).to_string()),
            },
            ["stats"] => Self::Stats,
            _ => return Err(USAGE.to_string()),
        };
        Ok(command)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    // Load configuration from environment variables
    let config = match RegistryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(
        "Loaded configuration: root_directory={}, engine={}",
        config.root_directory.display(),
        config.engine
    );

    let (registry, report) = match NamespaceRegistry::open(config) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!("Failed to open registry: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&registry, command, &report);
    let finished = result.and_then(|()| {
        recoverable("maintenance", registry.maintain())?;
        registry.shutdown().map(|_| ())
    });

    match finished {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_fatal() {
                tracing::error!("fatal: {e}");
            } else {
                tracing::error!("{e}");
            }
            if let Err(e) = registry.shutdown() {
                tracing::error!("Failed to shut down registry: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(
    registry: &NamespaceRegistry,
    command: Command,
    report: &MigrationReport,
) -> Result<(), RegistryError> {
    match command {
        Command::Migrate => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        Command::Get { namespace, key } => {
            println!("{}", registry.accessor(&namespace)?.get(&key)?);
        }
        Command::Set {
            namespace,
            key,
            value,
        } => {
            registry.accessor(&namespace)?.set(&key, value)?;
        }
        Command::Delete { namespace, key } => {
            println!("{}", registry.accessor(&namespace)?.delete(&key)?);
        }
        Command::Keys { namespace, prefix } => {
            let filter = prefix.map(KeyFilter::Prefix);
            registry
                .accessor(&namespace)?
                .each_key(filter.as_ref(), |key| println!("{key}"))?;
        }
        Command::Dump { namespace, prefix } => {
            let filter = prefix.map(KeyFilter::Prefix);
            registry
                .accessor(&namespace)?
                .each(filter.as_ref(), |key, value| println!("{key}\t{value}"))?;
        }
        Command::Stats => {
            registry.environment()?;
            if let Some(stats) = registry.stats() {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> Result<Command, String> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        Command::parse(&args)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse(&["migrate"]).unwrap(), Command::Migrate);
        assert_eq!(parse(&["stats"]).unwrap(), Command::Stats);
        assert_eq!(
            parse(&["set", "weather", "london", r#"{"temp":15}"#]).unwrap(),
            Command::Set {
                namespace: "weather".to_string(),
                key: "london".to_string(),
                value: json!({"temp": 15}),
            }
        );
        assert_eq!(
            parse(&["keys", "weather"]).unwrap(),
            Command::Keys {
                namespace: "weather".to_string(),
                prefix: None,
            }
        );
        assert_eq!(
            parse(&["dump", "weather", "lon"]).unwrap(),
            Command::Dump {
                namespace: "weather".to_string(),
                prefix: Some("lon".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse(&[]).unwrap_err(), USAGE);
        assert_eq!(parse(&["get", "weather"]).unwrap_err(), USAGE);
        assert_eq!(parse(&["keys", "a", "b", "c"]).unwrap_err(), USAGE);
        assert!(
            parse(&["set", "weather", "london", "{oops"])
                .unwrap_err()
                .starts_with("invalid JSON value")
        );
    }
}

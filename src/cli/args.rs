//! Argument parsing for the server binary.
//!
//! The entry points are [`parse_args`] (reads `std::env::args()`) and
//! [`parse_args_from`] (takes an explicit slice, suitable for
//! unit-testing).  Long options use either `--option VALUE` or
//! `--option=VALUE` syntax.  Bad or unrecognised options return an `Err`
//! with a human-readable message that begins with `"bad usage: "`.

use anyhow::{anyhow, Result};

use crate::server::{Config, MaxmemoryPolicy};

/// Complete set of options produced by the argument parsing loop.
#[derive(Debug)]
pub struct ParsedArgs {
    /// Fully resolved server configuration.
    pub config: Config,
    /// Logging verbosity delta (`-v` raises, `-q` lowers).
    pub verbosity: i32,
    /// When `true`, a `--version`/`--help` flag was processed; the caller
    /// should exit 0 without starting the server.
    pub exit_early: bool,
}

/// Parse the process arguments.
pub fn parse_args() -> Result<ParsedArgs> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_args_from(&args)
}

/// Parse an explicit argument slice.
pub fn parse_args_from(args: &[String]) -> Result<ParsedArgs> {
    let mut config = Config::default();
    let mut verbosity = 0;
    let mut exit_early = false;

    let mut i = 0;
    while i < args.len() {
        let (opt, inline_val) = match args[i].split_once('=') {
            Some((o, v)) => (o.to_string(), Some(v.to_string())),
            None => (args[i].clone(), None),
        };
        let mut take_value = |i: &mut usize| -> Result<String> {
            if let Some(v) = &inline_val {
                return Ok(v.clone());
            }
            *i += 1;
            args.get(*i)
                .cloned()
                .ok_or_else(|| anyhow!("bad usage: missing value for {opt}"))
        };

        match opt.as_str() {
            "--port" => config.port = parse_number(&take_value(&mut i)?, "port")?,
            "--bind" => config.bind = Some(take_value(&mut i)?),
            "--unixsocket" => config.unixsocket = Some(take_value(&mut i)?),
            "--tcp-backlog" => config.tcp_backlog = parse_number(&take_value(&mut i)?, "tcp-backlog")?,
            "--tcp-keepalive" => {
                config.tcp_keepalive = parse_number(&take_value(&mut i)?, "tcp-keepalive")?
            }
            "--maxclients" => config.maxclients = parse_number(&take_value(&mut i)?, "maxclients")?,
            "--maxmemory" => config.maxmemory = parse_memory(&take_value(&mut i)?)?,
            "--maxmemory-policy" => {
                let v = take_value(&mut i)?;
                config.maxmemory_policy = v
                    .parse::<MaxmemoryPolicy>()
                    .map_err(|e| anyhow!("bad usage: {e}"))?;
            }
            "--maxmemory-samples" => {
                config.maxmemory_samples = parse_number(&take_value(&mut i)?, "maxmemory-samples")?
            }
            "--databases" => {
                config.databases = parse_number(&take_value(&mut i)?, "databases")?;
                if config.databases == 0 {
                    return Err(anyhow!("bad usage: databases must be at least 1"));
                }
            }
            "--hz" => {
                config.hz = parse_number(&take_value(&mut i)?, "hz")?;
                config.hz = config.hz.clamp(1, 500);
            }
            "--timeout" => config.timeout = parse_number(&take_value(&mut i)?, "timeout")?,
            "-v" | "--verbose" => verbosity += 1,
            "-q" | "--quiet" => verbosity -= 1,
            "--version" => {
                println!("rudis-server v{}", crate::RUDIS_VERSION_STRING);
                exit_early = true;
            }
            "-h" | "--help" => {
                print_usage();
                exit_early = true;
            }
            other => return Err(anyhow!("bad usage: unknown option '{other}'")),
        }
        i += 1;
    }

    Ok(ParsedArgs {
        config,
        verbosity,
        exit_early,
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| anyhow!("bad usage: invalid {what} '{value}'"))
}

/// Byte count with an optional `kb`/`mb`/`gb` (binary) or `k`/`m`/`g`
/// (decimal) suffix, case-insensitive.
fn parse_memory(value: &str) -> Result<u64> {
    let lower = value.to_ascii_lowercase();
    let (digits, mult) = if let Some(d) = lower.strip_suffix("kb") {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("mb") {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("gb") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix('k') {
        (d, 1000)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1000 * 1000)
    } else if let Some(d) = lower.strip_suffix('g') {
        (d, 1000 * 1000 * 1000)
    } else if let Some(d) = lower.strip_suffix('b') {
        (d, 1)
    } else {
        (lower.as_str(), 1)
    };
    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|_| anyhow!("bad usage: invalid memory amount '{value}'"))?;
    Ok(base * mult)
}

fn print_usage() {
    println!(
        "usage: rudis-server [options]\n\
         \n\
         --port <port>               TCP port to listen on (default 6379, 0 disables)\n\
         --bind <address>            interface address to bind (default all)\n\
         --unixsocket <path>         also listen on a local socket\n\
         --tcp-backlog <n>           listen backlog (default 511)\n\
         --tcp-keepalive <seconds>   keepalive probe interval (default off)\n\
         --maxclients <n>            concurrent client cap (default 10000)\n\
         --maxmemory <bytes>         memory cap, 0 = unlimited (accepts kb/mb/gb)\n\
         --maxmemory-policy <name>   noeviction | allkeys-lru | volatile-lru |\n\
         \u{20}                           allkeys-random | volatile-random | volatile-ttl\n\
         --maxmemory-samples <n>     eviction sampling width (default 5)\n\
         --databases <n>             number of databases (default 16)\n\
         --hz <n>                    cron frequency (default 10)\n\
         --timeout <seconds>         idle client timeout, 0 = never\n\
         -v / -q                     raise / lower log verbosity\n\
         --version                   print version and exit\n\
         -h, --help                  this text"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_when_empty() {
        let parsed = parse_args_from(&[]).unwrap();
        assert_eq!(parsed.config.port, 6379);
        assert!(!parsed.exit_early);
    }

    #[test]
    fn memory_suffixes() {
        let parsed =
            parse_args_from(&strings(&["--maxmemory", "100mb", "--port", "7000"])).unwrap();
        assert_eq!(parsed.config.maxmemory, 100 * 1024 * 1024);
        assert_eq!(parsed.config.port, 7000);
    }

    #[test]
    fn equals_syntax_and_policy() {
        let parsed = parse_args_from(&strings(&["--maxmemory-policy=allkeys-lru"])).unwrap();
        assert_eq!(
            parsed.config.maxmemory_policy,
            crate::server::MaxmemoryPolicy::AllkeysLru
        );
    }

    #[test]
    fn unknown_option_is_bad_usage() {
        let err = parse_args_from(&strings(&["--bogus"])).unwrap_err();
        assert!(err.to_string().starts_with("bad usage: "));
    }
}

use std::path::PathBuf;

pub(crate) const USAGE: &str = "\
usage: dapctl [--config-dir DIR] [--breakpoint FILE:LINE]... [--function NAME]... <configuration>

options:
  --config-dir DIR        read config.toml from DIR instead of ~/.config/dapctl
  --breakpoint FILE:LINE  add a source breakpoint before launching
  --function NAME         add a function breakpoint before launching
  -h, --help              print this help";

/// A source breakpoint given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LineBreakpoint {
    pub file: PathBuf,
    pub line: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Help,
    Debug(CliArgs),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CliArgs {
    pub config_dir: Option<PathBuf>,
    pub breakpoints: Vec<LineBreakpoint>,
    pub functions: Vec<String>,
    pub configuration: String,
}

/// Parse the arguments following the program name.
pub(crate) fn parse<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config_dir = None;
    let mut breakpoints = Vec::new();
    let mut functions = Vec::new();
    let mut configuration = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--config-dir" => {
                let dir = args.next().ok_or("--config-dir needs a directory")?;
                config_dir = Some(PathBuf::from(dir));
            }
            "--breakpoint" => {
                let location = args.next().ok_or("--breakpoint needs FILE:LINE")?;
                breakpoints.push(parse_line_breakpoint(&location)?);
            }
            "--function" => {
                let name = args.next().ok_or("--function needs a name")?;
                functions.push(name);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
            _ => {
                if configuration.is_some() {
                    return Err(format!("unexpected argument '{arg}'"));
                }
                configuration = Some(arg);
            }
        }
    }

    let configuration = configuration.ok_or("missing configuration name")?;
    Ok(Command::Debug(CliArgs {
        config_dir,
        breakpoints,
        functions,
        configuration,
    }))
}

fn parse_line_breakpoint(location: &str) -> Result<LineBreakpoint, String> {
    let (file, line) = location
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid breakpoint '{location}', expected FILE:LINE"))?;
    let line: i64 = line
        .parse()
        .map_err(|_| format!("invalid line number in '{location}'"))?;
    if file.is_empty() || line < 1 {
        return Err(format!("invalid breakpoint '{location}', expected FILE:LINE"));
    }
    Ok(LineBreakpoint {
        file: PathBuf::from(file),
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_configuration_name_only() {
        let cmd = parse(args(&["Run"])).unwrap();
        assert_eq!(
            cmd,
            Command::Debug(CliArgs {
                config_dir: None,
                breakpoints: Vec::new(),
                functions: Vec::new(),
                configuration: "Run".into(),
            })
        );
    }

    #[test]
    fn parses_repeated_breakpoints_and_functions() {
        let cmd = parse(args(&[
            "--breakpoint",
            "src/main.rs:12",
            "--function",
            "main",
            "--breakpoint",
            "lib.c:3",
            "--config-dir",
            "/tmp/cfg",
            "Run",
        ]))
        .unwrap();
        let Command::Debug(cli) = cmd else {
            panic!("expected debug command");
        };
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/cfg")));
        assert_eq!(cli.functions, vec!["main".to_string()]);
        assert_eq!(cli.breakpoints.len(), 2);
        assert_eq!(cli.breakpoints[0].file, PathBuf::from("src/main.rs"));
        assert_eq!(cli.breakpoints[0].line, 12);
        assert_eq!(cli.breakpoints[1].line, 3);
    }

    #[test]
    fn breakpoint_uses_last_colon() {
        let bp = parse_line_breakpoint("C:/src/app.py:40").unwrap();
        assert_eq!(bp.file, PathBuf::from("C:/src/app.py"));
        assert_eq!(bp.line, 40);
    }

    #[test]
    fn rejects_bad_breakpoints() {
        assert!(parse_line_breakpoint("main.rs").is_err());
        assert!(parse_line_breakpoint("main.rs:x").is_err());
        assert!(parse_line_breakpoint(":4").is_err());
        assert!(parse_line_breakpoint("main.rs:0").is_err());
    }

    #[test]
    fn help_wins() {
        assert_eq!(parse(args(&["Run", "--help"])).unwrap(), Command::Help);
    }

    #[test]
    fn errors_on_missing_values_and_extra_args() {
        assert!(parse(args(&[])).is_err());
        assert!(parse(args(&["--config-dir"])).is_err());
        assert!(parse(args(&["--verbose", "Run"])).is_err());
        assert!(parse(args(&["Run", "Other"])).is_err());
    }
}

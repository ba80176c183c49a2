use crate::errors::Diagnostic;
use crate::export::CaseTransform;
use crate::frontend::config::{GeneratorConfig, CONFIG_FILE};
use crate::infrastructure::logging::{init_logging, LogConfig};
use crate::model::ModuleDescriptor;
use crate::session::{GeneratedModule, Session};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

const USAGE: &str = "[OPTIONS] <module.json>\n\nOptions:\n  \
     --config PATH    Use this jsbridge.toml instead of searching for one\n  \
     --out-dir DIR    Write generated files here (default: next to the module)\n  \
     --init           Write a default jsbridge.toml and exit\n  \
     --preserve-case  Keep host member names unchanged\n  \
     --no-parallel    Classify types on the calling thread\n  \
     --no-color       Disable colored output\n  \
     --max-errors N   Maximum diagnostics to report (default: 100)\n  \
     --shape          Print the generated declarations to stdout\n  \
     --verbose        Debug-level logging";

/// Command-line options. `None` leaves the config file's value in place.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub module: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub init: bool,
    pub preserve_case: bool,
    pub parallel: Option<bool>,
    pub color: Option<bool>,
    pub max_errors: Option<usize>,
    pub print_shape: bool,
    pub verbose: bool,
}

pub struct Cli {
    config: CliConfig,
}

impl Cli {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    pub fn run(&self) -> Result<i32, String> {
        if self.config.init {
            return self.init();
        }
        let module_path = self
            .config
            .module
            .as_deref()
            .ok_or_else(|| "No module descriptor specified".to_string())?;

        let settings = self.settings(module_path)?;
        let mut log_config = LogConfig::from_settings(&settings.logging);
        if self.config.verbose {
            log_config = log_config.with_level(Level::DEBUG);
        }
        let _guard = init_logging(log_config);

        let text = fs::read_to_string(module_path)
            .map_err(|e| format!("Failed to read {}: {}", module_path.display(), e))?;
        let module = ModuleDescriptor::from_json(&text)
            .map_err(|e| format!("Invalid module descriptor {}: {}", module_path.display(), e))?;

        let generated = Session::new(&module, &settings).run().map_err(|e| e.to_string())?;
        if generated.has_errors() {
            self.print_diagnostics(&settings, &generated);
            return Ok(1);
        }

        let out_dir = self.out_dir(module_path);
        let written = self.write_outputs(&settings, &generated, &out_dir)?;
        if self.config.print_shape {
            print!("{}", generated.shape);
        }
        self.print_success(
            &settings,
            &format!(
                "✓ Generated module '{}': {} class{}, {} adapter{}, {} codec{}",
                generated.name,
                generated.classes.len(),
                if generated.classes.len() == 1 { "" } else { "es" },
                generated.adapters.len(),
                plural(generated.adapters.len()),
                generated.codecs.len(),
                plural(generated.codecs.len()),
            ),
        );
        for path in written {
            self.print_success(&settings, &format!("  wrote {}", path.display()));
        }
        Ok(0)
    }

    fn init(&self) -> Result<i32, String> {
        let dir = self.config.out_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            return Err(format!("{} already exists", path.display()));
        }
        fs::write(&path, GeneratorConfig::generate_default())
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        println!("Created {}", path.display());
        Ok(0)
    }

    /// Config file settings with command-line overrides applied.
    fn settings(&self, module_path: &Path) -> Result<GeneratorConfig, String> {
        let mut settings = match &self.config.config {
            Some(path) => GeneratorConfig::load(path).map_err(|e| e.to_string())?,
            None => GeneratorConfig::discover_from(module_path.parent().unwrap_or(Path::new("."))),
        };
        if self.config.preserve_case {
            settings.naming.case_transform = CaseTransform::Preserve;
        }
        if let Some(parallel) = self.config.parallel {
            settings.generation.parallel = parallel;
        }
        if let Some(color) = self.config.color {
            settings.diagnostics.color = color;
        }
        if let Some(max) = self.config.max_errors {
            settings.diagnostics.max_diagnostics = max;
        }
        Ok(settings)
    }

    fn out_dir(&self, module_path: &Path) -> PathBuf {
        match &self.config.out_dir {
            Some(dir) => dir.clone(),
            None => module_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    fn write_outputs(
        &self,
        settings: &GeneratorConfig,
        generated: &GeneratedModule,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, String> {
        fs::create_dir_all(out_dir).map_err(|e| format!("Failed to create {}: {}", out_dir.display(), e))?;
        let mut written = Vec::new();

        if settings.output.emit_source {
            let path = out_dir.join(&settings.output.source_file);
            fs::write(&path, &generated.source).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            written.push(path);
        }
        if settings.output.emit_shapes {
            let path = out_dir.join(&settings.output.shapes_file);
            let json = generated.shape.to_json().map_err(|e| e.to_string())?;
            fs::write(&path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            written.push(path);
        }
        Ok(written)
    }

    fn print_diagnostics(&self, settings: &GeneratorConfig, generated: &GeneratedModule) {
        for diagnostic in &generated.diagnostics {
            let shown = if settings.diagnostics.show_suggestions {
                diagnostic.clone()
            } else {
                Diagnostic {
                    suggestions: Vec::new(),
                    ..diagnostic.clone()
                }
            };
            self.print_error(settings, &shown.to_string());
        }
        if generated.dropped_diagnostics > 0 {
            self.print_error(
                settings,
                &format!("... and {} more not shown", generated.dropped_diagnostics),
            );
        }
        eprintln!();
        let count = generated.error_count();
        self.print_error(
            settings,
            &format!("Found {} error{} in module '{}'", count, plural(count), generated.name),
        );
    }

    fn print_error(&self, settings: &GeneratorConfig, msg: &str) {
        if settings.diagnostics.color {
            eprintln!("\x1b[31m{}\x1b[0m", msg);
        } else {
            eprintln!("{}", msg);
        }
    }

    fn print_success(&self, settings: &GeneratorConfig, msg: &str) {
        if settings.diagnostics.color {
            println!("\x1b[32m{}\x1b[0m", msg);
        } else {
            println!("{}", msg);
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Parse `args` including the program name in position 0.
pub fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let program = args.first().map(String::as_str).unwrap_or("jsbridge");
    if args.len() < 2 {
        return Err(format!("Usage: {} {}", program, USAGE));
    }

    let mut config = CliConfig::default();
    let mut i = 1;

    let value = |i: usize, flag: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("{} requires an argument", flag))
    };

    while i < args.len() {
        match args[i].as_str() {
            "--init" => config.init = true,
            "--preserve-case" => config.preserve_case = true,
            "--no-parallel" => config.parallel = Some(false),
            "--no-color" => config.color = Some(false),
            "--shape" => config.print_shape = true,
            "--verbose" | "-v" => config.verbose = true,
            "--config" => {
                i += 1;
                config.config = Some(PathBuf::from(value(i, "--config")?));
            }
            "--out-dir" => {
                i += 1;
                config.out_dir = Some(PathBuf::from(value(i, "--out-dir")?));
            }
            "--max-errors" => {
                i += 1;
                config.max_errors = Some(
                    value(i, "--max-errors")?
                        .parse()
                        .map_err(|_| "Invalid value for --max-errors".to_string())?,
                );
            }
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            path => {
                if config.module.is_some() {
                    return Err(format!("Unexpected argument: {}", path));
                }
                config.module = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    if config.module.is_none() && !config.init {
        return Err("No module descriptor specified".to_string());
    }

    Ok(config)
}

/// Entry point for CLI binary
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args)?;
    let cli = Cli::new(config);
    let exit_code = cli.run()?;
    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("jsbridge").chain(list.iter().copied()).map(String::from).collect()
    }

    #[test]
    fn test_parse_args() {
        let config = parse_args(&args(&[
            "--no-color",
            "--max-errors",
            "5",
            "--out-dir",
            "gen",
            "module.json",
        ]))
        .unwrap();
        assert_eq!(config.module, Some(PathBuf::from("module.json")));
        assert_eq!(config.out_dir, Some(PathBuf::from("gen")));
        assert_eq!(config.max_errors, Some(5));
        assert_eq!(config.color, Some(false));
        assert_eq!(config.parallel, None);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&[])).unwrap_err().starts_with("Usage: jsbridge"));
        assert_eq!(parse_args(&args(&["--max-errors"])).unwrap_err(), "--max-errors requires an argument");
        assert_eq!(parse_args(&args(&["--max-errors", "x", "m.json"])).unwrap_err(), "Invalid value for --max-errors");
        assert_eq!(parse_args(&args(&["--bogus"])).unwrap_err(), "Unknown option: --bogus");
        assert_eq!(parse_args(&args(&["a.json", "b.json"])).unwrap_err(), "Unexpected argument: b.json");
        assert!(parse_args(&args(&["--init"])).unwrap().init);
    }

    #[test]
    fn test_overrides_apply_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = GeneratorConfig::default();
        file.diagnostics.max_diagnostics = 3;
        file.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let module = dir.path().join("module.json");
        let cli = Cli::new(CliConfig {
            module: Some(module.clone()),
            preserve_case: true,
            parallel: Some(false),
            ..CliConfig::default()
        });
        let settings = cli.settings(&module).unwrap();
        assert_eq!(settings.diagnostics.max_diagnostics, 3);
        assert_eq!(settings.naming.case_transform, CaseTransform::Preserve);
        assert!(!settings.generation.parallel);
    }
}

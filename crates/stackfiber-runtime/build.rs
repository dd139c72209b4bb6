//! Build script for stackfiber-runtime
//!
//! Merges library defaults with an optional user config file:
//! 1. Start with library defaults
//! 2. If SF_CONFIG_RS is set, parse `pub const NAME: TYPE = VALUE;` lines from it
//! 3. User values win over defaults
//! 4. Write OUT_DIR/sf_merged_config.rs
//!
//! Runtime environment variables (see `config`) still override the result.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "128 * 1024",
    },
    ConfigParam {
        name: "MIN_STACK_SIZE",
        rust_type: "usize",
        default_value: "16 * 1024",
    },
    ConfigParam {
        name: "GUARD_PAGES",
        rust_type: "usize",
        default_value: "1",
    },
    ConfigParam {
        name: "DEBUG_LOGGING",
        rust_type: "bool",
        default_value: "false",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("sf_merged_config.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var("SF_CONFIG_RS").ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);

        match fs::read_to_string(path) {
            Ok(content) => {
                for unknown in parse_and_merge(&content, &mut config) {
                    println!("cargo:warning=Unknown config parameter: {}", unknown);
                }
                println!("cargo:warning=Using custom config: {}", path);
            }
            Err(e) => {
                println!("cargo:warning=Failed to read SF_CONFIG_RS ({}): {}", path, e);
            }
        }
    }

    println!("cargo:rerun-if-env-changed=SF_CONFIG_RS");

    let output = generate_config(&config, user_path.is_some());
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Merge known `pub const` lines into `config`; returns unknown names
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) -> Vec<String> {
    let mut unknown = Vec::new();

    for line in content.lines().map(str::trim) {
        if !line.starts_with("pub const ") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => unknown.push(name),
        }
    }

    unknown
}

/// Parse `pub const NAME: TYPE = VALUE;` into (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    if semi_pos <= eq_pos {
        return None;
    }

    let value = rest[eq_pos + 1..semi_pos].trim().to_string();
    if value.is_empty() {
        return None;
    }

    Some((name, value))
}

fn generate_config(config: &HashMap<&str, String>, custom: bool) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Configuration merged from library defaults");
    if custom {
        output.push_str(" and SF_CONFIG_RS");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        assert_eq!(
            parse_const_line("pub const STACK_SIZE: usize = 256 * 1024;"),
            Some(("STACK_SIZE".into(), "256 * 1024".into()))
        );
        assert_eq!(
            parse_const_line("pub const DEBUG_LOGGING: bool = true;"),
            Some(("DEBUG_LOGGING".into(), "true".into()))
        );
        assert_eq!(parse_const_line("pub const BROKEN: usize;"), None);
    }

    #[test]
    fn test_parse_and_merge() {
        let mut config: HashMap<&str, String> = HashMap::new();
        config.insert("STACK_SIZE", "128 * 1024".into());

        let user_config = r#"
            // Bigger stacks for deep recursion
            pub const STACK_SIZE: usize = 1024 * 1024;
            pub const NUM_WORKERS: usize = 8;
        "#;

        let unknown = parse_and_merge(user_config, &mut config);

        assert_eq!(config.get("STACK_SIZE"), Some(&"1024 * 1024".to_string()));
        assert_eq!(unknown, vec!["NUM_WORKERS".to_string()]);
    }

    #[test]
    fn test_generate_falls_back_to_defaults() {
        let out = generate_config(&HashMap::new(), false);
        assert!(out.contains("pub const STACK_SIZE: usize = 128 * 1024;"));
        assert!(out.contains("pub const GUARD_PAGES: usize = 1;"));
    }
}

//! Translate command implementation.

use crate::control::registry::RegistrySnapshot;
use crate::control::translate::{RouteDescriptor, RouteTranslator};
use crate::core::config::Config;
use crate::source::manifest::Manifest;
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Print the route configuration derived from a manifest.
#[derive(Args, Debug)]
pub struct TranslateArgs {
    /// Manifest file to translate.
    pub manifest: PathBuf,
}

#[derive(Debug, Serialize)]
struct TranslationOutput {
    route_config_name: String,
    resources: usize,
    skipped: usize,
    virtual_hosts: Vec<RouteDescriptor>,
}

/// Translate the manifest with the configured annotation keys and print JSON.
pub fn run_translate(config_path: &Path, args: TranslateArgs) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let output = translate_manifest(&config, &Manifest::from_file(&args.manifest)?);
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn translate_manifest(config: &Config, manifest: &Manifest) -> TranslationOutput {
    let translator = RouteTranslator::new(
        config.server.route_config_name.clone(),
        config.annotations.clone(),
    );
    let snapshot = RegistrySnapshot::from_resources(manifest.by_key().into_values());
    let virtual_hosts = translator.descriptors(&snapshot);

    TranslationOutput {
        route_config_name: translator.route_config_name().to_string(),
        resources: snapshot.len(),
        skipped: snapshot.len() - virtual_hosts.len(),
        virtual_hosts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_manifest_counts_skipped() {
        let manifest = Manifest::from_toml(
            r#"
[[resource]]
name = "edge"
namespace = "default"

[resource.annotations]
"stoakes.github.com/hostname" = "a.com,b.com"
"stoakes.github.com/cluster" = "svc1"
"stoakes.github.com/prefix" = "/api"

[[resource]]
name = "plain"
namespace = "default"
"#,
        )
        .unwrap();

        let output = translate_manifest(&Config::default(), &manifest);
        assert_eq!(output.route_config_name, "rds_config_name");
        assert_eq!(output.resources, 2);
        assert_eq!(output.skipped, 1);
        assert_eq!(output.virtual_hosts[0].path_prefix, "/api");

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["virtual_hosts"][0]["target_cluster"], "svc1");
    }
}

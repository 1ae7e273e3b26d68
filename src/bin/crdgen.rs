//! # CRD Generator
//!
//! Prints the `ArgoCD` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/argocd.yaml
//! cargo run --bin crdgen -- --output config/crd/argocd.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use argocd_operator::crd::ArgoCD;
use clap::Parser;
use kube::core::CustomResourceExt;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Generate the ArgoCD CustomResourceDefinition")]
struct Args {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

const HEADER: &str = "# This file is auto-generated by crdgen
# DO NOT EDIT THIS FILE MANUALLY
# Change the types under src/crd and regenerate
---
";

fn main() {
    let args = Args::parse();

    let yaml = match serde_yaml::to_string(&ArgoCD::crd()) {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    };

    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, format!("{HEADER}{yaml}")) {
                eprintln!("Failed to write {}: {e}", path.display());
                std::process::exit(1);
            }
        }
        None => print!("{HEADER}{yaml}"),
    }
}

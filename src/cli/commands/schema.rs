use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::entity::catalog::AdminSchemas;
use crate::schema::{Constraint, DefaultValue, FieldRule, SchemaDescriptor, SchemaDeriver};

#[derive(Subcommand)]
pub enum SchemaCommands {
    #[command(about = "List registered entities and derived schemas")]
    List {
        #[arg(long, help = "Registry YAML file (defaults to the built-in admin catalog)")]
        file: Option<PathBuf>,
    },

    #[command(about = "Show an entity schema, optionally as a derived partial schema")]
    Show {
        #[arg(help = "Entity or derived schema name")]
        entity: String,

        #[arg(long, value_delimiter = ',', help = "Fields to exclude (comma-separated)")]
        exclude: Vec<String>,

        #[arg(long, help = "Name for the derived schema")]
        name: Option<String>,

        #[arg(long, help = "Registry YAML file (defaults to the built-in admin catalog)")]
        file: Option<PathBuf>,
    },

    #[command(about = "Validate a registry and its relationships")]
    Check {
        #[arg(long, help = "Registry YAML file (defaults to the built-in admin catalog)")]
        file: Option<PathBuf>,
    },
}

pub async fn handle(cmd: SchemaCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SchemaCommands::List { file } => {
            let registry = load_registry(file.as_deref())?;
            if registry.is_empty() {
                return output_empty_collection(&output_format, "entities", "No entities registered");
            }

            let derived: Vec<String> = if file.is_none() {
                AdminSchemas::derive()?.iter().map(|s| s.name().to_string()).collect()
            } else {
                vec![]
            };

            match output_format {
                OutputFormat::Json => {
                    let entities: Vec<_> = registry
                        .iter()
                        .map(|d| {
                            json!({
                                "name": d.name(),
                                "table": d.table(),
                                "primary_key": d.primary_key(),
                                "relationships": d.relationships(),
                            })
                        })
                        .collect();
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({ "entities": entities, "derived": derived }))?
                    );
                }
                OutputFormat::Text => {
                    println!("{:<14} {:<14} {:<10} RELATIONSHIPS", "ENTITY", "TABLE", "KEY");
                    for d in registry.iter() {
                        let relationships: Vec<&str> = d.relationships().iter().map(|r| r.name.as_str()).collect();
                        println!(
                            "{:<14} {:<14} {:<10} {}",
                            d.name(),
                            d.table(),
                            d.primary_key(),
                            relationships.join(", ")
                        );
                    }
                    if !derived.is_empty() {
                        println!("\nDerived schemas: {}", derived.join(", "));
                    }
                }
            }
            Ok(())
        }
        SchemaCommands::Show { entity, exclude, name, file } => {
            let registry = load_registry(file.as_deref())?;

            let base = match registry.get(&entity) {
                Some(descriptor) => descriptor.schema().clone(),
                None if file.is_none() => AdminSchemas::derive()?
                    .get(&entity)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Unknown entity or schema '{}'", entity))?,
                None => anyhow::bail!("Unknown entity '{}'", entity),
            };

            let schema = if exclude.is_empty() && name.is_none() {
                base
            } else {
                match name {
                    Some(name) => SchemaDeriver::derive_named(&base, name, &exclude)?,
                    None => SchemaDeriver::derive(&base, &exclude)?,
                }
            };

            print_schema(&schema, &output_format)
        }
        SchemaCommands::Check { file } => {
            let registry = load_registry(file.as_deref())?;
            registry.validate()?;
            output_success(
                &output_format,
                &format!("Registry is valid ({} entities)", registry.len()),
                Some(json!({ "entities": registry.names().collect::<Vec<_>>() })),
            )
        }
    }
}

fn print_schema(schema: &SchemaDescriptor, output_format: &OutputFormat) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(schema)?);
        }
        OutputFormat::Text => {
            println!("Schema: {}", schema.name());
            println!("{:<16} {:<10} {:<9} {:<14} CONSTRAINTS", "FIELD", "TYPE", "REQUIRED", "DEFAULT");
            for rule in schema.fields() {
                println!(
                    "{:<16} {:<10} {:<9} {:<14} {}",
                    rule.name,
                    format!("{:?}", rule.field_type).to_lowercase(),
                    if rule.required { "yes" } else { "no" },
                    describe_default(rule),
                    describe_constraints(rule)
                );
            }
        }
    }
    Ok(())
}

fn describe_default(rule: &FieldRule) -> String {
    if rule.required {
        return "-".to_string();
    }
    match &rule.default {
        DefaultValue::Unset => "unset".to_string(),
        DefaultValue::Null => "null".to_string(),
        DefaultValue::Value(v) => v.to_string(),
        DefaultValue::GeneratedUuid => "uuid4()".to_string(),
    }
}

fn describe_constraints(rule: &FieldRule) -> String {
    let mut parts: Vec<String> = rule
        .constraints
        .iter()
        .map(|c| match c {
            Constraint::MinLength(n) => format!("min_length={}", n),
            Constraint::MaxLength(n) => format!("max_length={}", n),
            Constraint::Minimum(n) => format!("minimum={}", n),
            Constraint::Maximum(n) => format!("maximum={}", n),
            Constraint::Pattern(p) => format!("pattern={}", p.as_str()),
            Constraint::StripWhitespace => "strip".to_string(),
        })
        .collect();
    if rule.unique {
        parts.push("unique".to_string());
    }
    parts.join(", ")
}

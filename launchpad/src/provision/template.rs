//! Infrastructure template rendering
//!
//! Templates are static per provider. Everything that varies with the plan is
//! passed through `terraform.tfvars.json`, so the rendered directory is a pure
//! function of the plan, the provider settings and the state key.

use serde_json::{json, Map, Value};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::framework::Language;
use crate::models::plan::{DeploymentPlan, DeploymentStyle, Provider};
use crate::storage::settings::{AwsSettings, GcpSettings};
use crate::utils::sha256_hash;

pub const VARS_FILE: &str = "terraform.tfvars.json";

/// Provider parameters that do not come from the plan
#[derive(Debug, Clone, Default)]
pub struct TemplateSettings {
    pub aws: AwsSettings,
    pub gcp: GcpSettings,
    pub ssh_port: u16,
}

/// A rendered template directory, not yet written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    /// File name and contents, in write order
    pub files: Vec<(String, String)>,
    /// SHA-256 over every file name and its contents
    pub digest: String,
}

impl RenderedTemplate {
    /// Write every file into `dir`, leaving the tool's state files alone
    pub async fn write_to(&self, dir: &Dir) -> Result<(), DeployError> {
        dir.create().await?;
        for (name, contents) in &self.files {
            dir.file(name).write_atomic(contents.as_bytes()).await?;
        }
        Ok(())
    }
}

/// Render the template for a plan
pub fn render(
    plan: &DeploymentPlan,
    settings: &TemplateSettings,
    state_key: &str,
) -> Result<RenderedTemplate, DeployError> {
    if plan.region.trim().is_empty() {
        return Err(DeployError::TemplateRenderError("region is empty".to_string()));
    }
    if plan.port == 0 {
        return Err(DeployError::TemplateRenderError("application port is 0".to_string()));
    }

    let name = resource_name(state_key);
    let mut vars = Map::new();
    vars.insert("name".to_string(), json!(name));
    vars.insert("region".to_string(), json!(plan.region));
    vars.insert("instance_type".to_string(), json!(plan.instance_type()));
    vars.insert("app_port".to_string(), json!(plan.port));
    vars.insert("ssh_port".to_string(), json!(settings.ssh_port));
    vars.insert("startup_script".to_string(), json!(startup_script(plan)));

    let main_tf = match plan.provider {
        Provider::Aws => {
            if settings.aws.ami_id.trim().is_empty() {
                return Err(DeployError::TemplateRenderError("aws.ami_id is empty".to_string()));
            }
            vars.insert("ami_id".to_string(), json!(settings.aws.ami_id));
            vars.insert("key_name".to_string(), json!(settings.aws.key_name));
            AWS_MAIN_TF
        }
        Provider::Gcp => {
            let project = settings
                .gcp
                .project
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    DeployError::TemplateRenderError("gcp.project is not configured".to_string())
                })?;
            vars.insert("project".to_string(), json!(project));
            vars.insert(
                "zone".to_string(),
                json!(format!("{}-{}", plan.region, settings.gcp.zone_suffix)),
            );
            vars.insert("image".to_string(), json!(settings.gcp.image));
            GCP_MAIN_TF
        }
    };

    let variables_tf = vars
        .keys()
        .map(|key| {
            let kind = if key == "app_port" || key == "ssh_port" {
                "number"
            } else {
                "string"
            };
            format!("variable \"{}\" {{\n  type = {}\n}}\n", key, kind)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let outputs_tf = match plan.provider {
        Provider::Aws => AWS_OUTPUTS_TF,
        Provider::Gcp => GCP_OUTPUTS_TF,
    };

    let vars_json = serde_json::to_string_pretty(&Value::Object(vars))
        .map_err(|e| DeployError::TemplateRenderError(e.to_string()))?;

    let files = vec![
        ("main.tf".to_string(), main_tf.to_string()),
        ("variables.tf".to_string(), variables_tf),
        ("outputs.tf".to_string(), outputs_tf.to_string()),
        (VARS_FILE.to_string(), vars_json),
    ];

    let mut digest_input = Vec::new();
    for (file_name, contents) in &files {
        digest_input.extend_from_slice(file_name.as_bytes());
        digest_input.push(0);
        digest_input.extend_from_slice(contents.as_bytes());
        digest_input.push(0);
    }

    Ok(RenderedTemplate {
        files,
        digest: sha256_hash(&digest_input),
    })
}

/// Cloud resource name derived from the state key
pub fn resource_name(state_key: &str) -> String {
    let suffix: String = state_key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_lowercase();
    format!("launchpad-{}", suffix)
}

/// First-boot script installing the runtime the plan needs
fn startup_script(plan: &DeploymentPlan) -> String {
    let (update, install) = match plan.provider {
        Provider::Aws => ("yum update -y", "yum install -y"),
        Provider::Gcp => ("apt-get update", "apt-get install -y"),
    };

    let packages = match (plan.style, plan.runtime) {
        (DeploymentStyle::Containerized, _) => match plan.provider {
            Provider::Aws => "docker",
            Provider::Gcp => "docker.io docker-compose-plugin",
        },
        (DeploymentStyle::SingleVm, Language::Python) => match plan.provider {
            Provider::Aws => "python3 python3-pip",
            Provider::Gcp => "python3 python3-venv python3-pip",
        },
        (DeploymentStyle::SingleVm, Language::Nodejs) => "nodejs npm",
        (DeploymentStyle::SingleVm, Language::Java) => match plan.provider {
            Provider::Aws => "java-17-amazon-corretto maven",
            Provider::Gcp => "openjdk-17-jdk maven",
        },
        (DeploymentStyle::SingleVm, Language::Php) => match plan.provider {
            Provider::Aws => "php php-cli php-json composer",
            Provider::Gcp => "php-cli php-xml php-mbstring composer",
        },
    };

    let mut script = format!("#!/bin/bash\n{}\n{} git {}\n", update, install, packages);
    if plan.style == DeploymentStyle::Containerized {
        script.push_str("systemctl enable --now docker\n");
    }
    script
}

const AWS_MAIN_TF: &str = r#"terraform {
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }
  }
}

provider "aws" {
  region = var.region
}

resource "aws_security_group" "app" {
  name        = "${var.name}-sg"
  description = "Application and remote access"

  ingress {
    from_port   = var.app_port
    to_port     = var.app_port
    protocol    = "tcp"
    cidr_blocks = ["0.0.0.0/0"]
  }

  ingress {
    from_port   = var.ssh_port
    to_port     = var.ssh_port
    protocol    = "tcp"
    cidr_blocks = ["0.0.0.0/0"]
  }

  egress {
    from_port   = 0
    to_port     = 0
    protocol    = "-1"
    cidr_blocks = ["0.0.0.0/0"]
  }
}

resource "aws_instance" "app" {
  ami                    = var.ami_id
  instance_type          = var.instance_type
  key_name               = var.key_name
  vpc_security_group_ids = [aws_security_group.app.id]
  user_data              = var.startup_script

  tags = {
    Name = var.name
  }
}

resource "aws_eip" "app" {
  instance = aws_instance.app.id
  domain   = "vpc"
}
"#;

const AWS_OUTPUTS_TF: &str = r#"output "public_ip" {
  value = aws_eip.app.public_ip
}

output "instance_id" {
  value = aws_instance.app.id
}

output "resource_ids" {
  value = [aws_instance.app.id, aws_security_group.app.id, aws_eip.app.id]
}
"#;

const GCP_MAIN_TF: &str = r#"terraform {
  required_providers {
    google = {
      source  = "hashicorp/google"
      version = "~> 5.0"
    }
  }
}

provider "google" {
  project = var.project
  region  = var.region
}

resource "google_compute_instance" "app" {
  name         = var.name
  machine_type = var.instance_type
  zone         = var.zone
  tags         = [var.name]

  boot_disk {
    initialize_params {
      image = var.image
    }
  }

  network_interface {
    network = "default"
    access_config {}
  }

  metadata_startup_script = var.startup_script
}

resource "google_compute_firewall" "app" {
  name    = "${var.name}-fw"
  network = "default"

  allow {
    protocol = "tcp"
    ports    = [tostring(var.app_port), tostring(var.ssh_port)]
  }

  source_ranges = ["0.0.0.0/0"]
  target_tags   = [var.name]
}
"#;

const GCP_OUTPUTS_TF: &str = r#"output "public_ip" {
  value = google_compute_instance.app.network_interface[0].access_config[0].nat_ip
}

output "instance_id" {
  value = google_compute_instance.app.instance_id
}

output "resource_ids" {
  value = [google_compute_instance.app.id, google_compute_firewall.app.id]
}
"#;

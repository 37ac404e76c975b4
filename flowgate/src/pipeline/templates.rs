//! Built-in stage templates

use serde::Serialize;

use crate::models::{Phase, StageDefinition};

/// One stage a template contributes
#[derive(Debug, Clone, Copy)]
pub struct TemplateStage {
    pub phase: Phase,
    pub name: &'static str,
    pub commands: &'static [&'static str],
    pub timeout_seconds: u32,
    pub continue_on_failure: bool,
}

impl TemplateStage {
    pub fn definition(&self) -> StageDefinition {
        StageDefinition {
            name: self.name.to_string(),
            commands: self.commands.iter().map(|c| c.to_string()).collect(),
            timeout_seconds: self.timeout_seconds,
            continue_on_failure: self.continue_on_failure,
            env: Default::default(),
            enabled: true,
        }
    }
}

/// A named, ordered set of stages
#[derive(Debug, Clone, Copy)]
pub struct PipelineTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub stages: &'static [TemplateStage],
}

/// Listing entry for a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSummary {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub stage_count: usize,
}

const LARAVEL: PipelineTemplate = PipelineTemplate {
    key: "laravel",
    name: "Laravel",
    description: "Composer and NPM install, asset build, migrations, config caching",
    stages: &[
        TemplateStage {
            phase: Phase::PreDeploy,
            name: "Install Composer Dependencies",
            commands: &["composer install --no-dev --optimize-autoloader --no-interaction"],
            timeout_seconds: 600,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::PreDeploy,
            name: "Install NPM Dependencies",
            commands: &["npm ci"],
            timeout_seconds: 600,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::PreDeploy,
            name: "Build Frontend Assets",
            commands: &["npm run build"],
            timeout_seconds: 600,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::Deploy,
            name: "Run Database Migrations",
            commands: &["php artisan migrate --force"],
            timeout_seconds: 300,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::PostDeploy,
            name: "Clear & Cache Config",
            commands: &[
                "php artisan config:cache",
                "php artisan route:cache",
                "php artisan view:cache",
            ],
            timeout_seconds: 120,
            continue_on_failure: true,
        },
        TemplateStage {
            phase: Phase::PostDeploy,
            name: "Restart Queue Workers",
            commands: &["php artisan queue:restart"],
            timeout_seconds: 60,
            continue_on_failure: true,
        },
    ],
};

const NODEJS: PipelineTemplate = PipelineTemplate {
    key: "nodejs",
    name: "Node.js",
    description: "Dependency install, tests, production build, process restart",
    stages: &[
        TemplateStage {
            phase: Phase::PreDeploy,
            name: "Install Dependencies",
            commands: &["npm ci"],
            timeout_seconds: 600,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::PreDeploy,
            name: "Run Tests",
            commands: &["npm test"],
            timeout_seconds: 900,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::Deploy,
            name: "Build Application",
            commands: &["npm run build"],
            timeout_seconds: 600,
            continue_on_failure: false,
        },
        TemplateStage {
            phase: Phase::PostDeploy,
            name: "Restart Application",
            commands: &["pm2 reload ecosystem.config.js --update-env"],
            timeout_seconds: 120,
            continue_on_failure: false,
        },
    ],
};

const STATIC: PipelineTemplate = PipelineTemplate {
    key: "static",
    name: "Static Site",
    description: "Copy the built site into the web root",
    stages: &[TemplateStage {
        phase: Phase::Deploy,
        name: "Copy Files",
        commands: &["rsync -a --delete ./public/ /var/www/html/"],
        timeout_seconds: 300,
        continue_on_failure: false,
    }],
};

static TEMPLATES: [PipelineTemplate; 3] = [LARAVEL, NODEJS, STATIC];

/// Look up a template by key
pub fn template(key: &str) -> Option<&'static PipelineTemplate> {
    TEMPLATES.iter().find(|t| t.key == key)
}

/// Every built-in template
pub fn templates() -> Vec<TemplateSummary> {
    TEMPLATES
        .iter()
        .map(|t| TemplateSummary {
            key: t.key,
            name: t.name,
            description: t.description,
            stage_count: t.stages.len(),
        })
        .collect()
}

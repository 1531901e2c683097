//! Template registry.
//!
//! Process-wide and read-mostly: templates are published rarely and looked up
//! on every count request, so each scope sits behind its own `RwLock` and
//! hands out `Arc<Template>`s that callers can use without holding a lock.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use pathmine_model::Model;

use crate::config::EngineConfig;
use crate::template::Template;
use crate::xml::{parse_templates, XmlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    User,
    /// Lookup only: user templates shadow global ones.
    All,
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(Scope::Global),
            "user" => Ok(Scope::User),
            "all" => Ok(Scope::All),
            other => Err(format!("unknown template scope `{other}`")),
        }
    }
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    global: RwLock<BTreeMap<String, Arc<Template>>>,
    user: RwLock<BTreeMap<String, Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(&self, scope: Scope) -> &RwLock<BTreeMap<String, Arc<Template>>> {
        match scope {
            Scope::User => &self.user,
            Scope::Global | Scope::All => &self.global,
        }
    }

    /// Publish a template, replacing any template of the same name in that
    /// scope. `Scope::All` publishes globally.
    pub fn publish(&self, scope: Scope, template: Template) -> Option<Arc<Template>> {
        let name = template.name().to_string();
        tracing::debug!(template = %name, ?scope, "publishing template");
        self.scope(scope).write().insert(name, Arc::new(template))
    }

    pub fn unpublish(&self, scope: Scope, name: &str) -> Option<Arc<Template>> {
        match scope {
            Scope::All => {
                let user = self.user.write().remove(name);
                let global = self.global.write().remove(name);
                user.or(global)
            }
            scope => self.scope(scope).write().remove(name),
        }
    }

    pub fn find_template(&self, name: &str, scope: Scope) -> Option<Arc<Template>> {
        match scope {
            Scope::All => self
                .user
                .read()
                .get(name)
                .cloned()
                .or_else(|| self.global.read().get(name).cloned()),
            scope => self.scope(scope).read().get(name).cloned(),
        }
    }

    /// Template names visible in a scope, sorted.
    pub fn names(&self, scope: Scope) -> Vec<String> {
        match scope {
            Scope::All => {
                let mut names: Vec<String> = self.user.read().keys().cloned().collect();
                names.extend(self.global.read().keys().cloned());
                names.sort();
                names.dedup();
                names
            }
            scope => self.scope(scope).read().keys().cloned().collect(),
        }
    }

    /// Parse a `<templates>` document and publish every template in it.
    pub fn load_xml(
        &self,
        xml: &str,
        scope: Scope,
        model: Arc<Model>,
        config: Arc<EngineConfig>,
    ) -> Result<usize, XmlError> {
        let templates = parse_templates(xml, model, config)?;
        let count = templates.len();
        for template in templates {
            for problem in template.query().problems() {
                tracing::warn!(
                    template = %template.name(),
                    path = %problem.path,
                    error = %problem.reason,
                    "template path does not resolve"
                );
            }
            self.publish(scope, template);
        }
        Ok(count)
    }
}

//! Prompt templates: catalog, rendering, and per-provider adaptation.
//!
//! A [`PromptTemplate`] declares named variable slots, base instruction
//! text, and the output fields the analysis must produce. [`render`]
//! substitutes slots from a content item plus caller context;
//! [`adapt_for_provider`] rewrites the expected output format for
//! providers that cannot reliably emit constrained JSON.
//!
//! Use `{{` / `}}` in instruction text for literal braces (e.g. JSON
//! examples inside a template).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::content::{ContentItem, GenerationParams};
use crate::error::{OrchestratorError, Result};
use crate::store::KvStore;

/// Sentinels that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// Store key under which user-created templates persist.
const USER_TEMPLATES_KEY: &str = "templates.user";

/// An analysis template: what to ask for and which output fields to expect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Named variable slots the instruction references.
    pub slots: Vec<String>,
    /// Base instruction text with `{slot}` placeholders.
    pub instruction: String,
    /// Output fields the provider reply must carry.
    pub required_fields: Vec<String>,
    /// Default generation parameters for this template.
    pub params: GenerationParams,
    /// Built-in templates are never deleted, only reset to default.
    pub built_in: bool,
}

impl PromptTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slots: vec!["name".into(), "content".into()],
            instruction: instruction.into(),
            required_fields: vec![
                "summary".into(),
                "insights".into(),
                "categories".into(),
                "relevance".into(),
            ],
            params: GenerationParams::default(),
            built_in: false,
        }
    }

    pub fn with_slots(mut self, slots: &[&str]) -> Self {
        self.slots = slots.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    fn built_in(mut self) -> Self {
        self.built_in = true;
        self
    }
}

/// Expected output format baked into a rendered prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Ask the provider for one JSON object with the required fields.
    StructuredJson,
    /// Ask for labeled free-text sections, one per required field.
    LabeledSections,
}

/// A fully rendered, provider-ready prompt.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// Which template produced this prompt.
    pub template_id: String,
    /// The complete prompt text, slots resolved, format instruction appended.
    pub text: String,
    /// Output fields the reply must carry (drives normalization).
    pub required_fields: Vec<String>,
    /// How the provider was asked to format its reply.
    pub format: OutputFormat,
}

/// Outcome of validating a template body before saving.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Problems found; empty means the body is valid.
    pub problems: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Substitute `{key}` placeholders, protecting `{{`/`}}` escapes.
fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut rendered = template.replace("{{", ESCAPE_SENTINEL);
    rendered = rendered.replace("}}", ESCAPE_SENTINEL_CLOSE);

    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }

    rendered = rendered.replace(ESCAPE_SENTINEL, "{");
    rendered.replace(ESCAPE_SENTINEL_CLOSE, "}")
}

/// Wrap text in a labeled section.
fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

/// Render a template against a content item and caller context.
///
/// Every declared slot must resolve from the item's attributes
/// (`name`, `modified`, `content`, `preview`) or the caller context map;
/// otherwise this fails with
/// [`UnresolvedSlot`](OrchestratorError::UnresolvedSlot).
///
/// The rendered prompt carries the JSON-oriented output instruction;
/// [`adapt_for_provider`] rewrites it for free-text providers.
pub fn render(
    template: &PromptTemplate,
    item: &ContentItem,
    context: &HashMap<String, String>,
) -> Result<RenderedPrompt> {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("name".into(), item.name.clone());
    vars.insert("modified".into(), item.last_modified.to_rfc3339());
    vars.insert("content".into(), item.content.clone());
    vars.insert("preview".into(), item.preview.clone());
    for (key, value) in context {
        vars.insert(key.clone(), value.clone());
    }

    for slot in &template.slots {
        if !vars.contains_key(slot.as_str()) {
            return Err(OrchestratorError::UnresolvedSlot {
                template: template.id.clone(),
                slot: slot.clone(),
            });
        }
    }

    let body = substitute(&template.instruction, &vars);
    let format_instruction = structured_instruction(&template.required_fields);

    Ok(RenderedPrompt {
        template_id: template.id.clone(),
        text: format!("{}\n\n{}", body, format_instruction),
        required_fields: template.required_fields.clone(),
        format: OutputFormat::StructuredJson,
    })
}

/// Adapt a rendered prompt to a provider's output capability.
///
/// Pure: the original prompt is untouched. Structured-capable providers
/// keep the JSON instruction; others get a labeled-sections rewrite.
pub fn adapt_for_provider(prompt: &RenderedPrompt, structured_output: bool) -> RenderedPrompt {
    if structured_output {
        return prompt.clone();
    }

    let json_instruction = structured_instruction(&prompt.required_fields);
    let sections_instruction = sections_instruction(&prompt.required_fields);
    let text = if prompt.text.ends_with(&json_instruction) {
        let base = &prompt.text[..prompt.text.len() - json_instruction.len()];
        format!("{}{}", base, sections_instruction)
    } else {
        format!("{}\n\n{}", prompt.text, sections_instruction)
    };

    RenderedPrompt {
        template_id: prompt.template_id.clone(),
        text,
        required_fields: prompt.required_fields.clone(),
        format: OutputFormat::LabeledSections,
    }
}

fn structured_instruction(fields: &[String]) -> String {
    format!(
        "Respond with a single JSON object containing exactly these fields: {}. \
         Do not include any text outside the JSON object.",
        fields.join(", ")
    )
}

fn sections_instruction(fields: &[String]) -> String {
    let sections = fields
        .iter()
        .map(|f| section(f, &format!("<your {} here>", f)))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Respond in plain text with one labeled section per line group, \
         in this exact layout:\n\n{}",
        sections
    )
}

/// Catalog of analysis templates: built-ins plus user-created entries.
///
/// User templates persist through the [`KvStore`] collaborator: loaded at
/// construction, saved on every create/update/remove.
pub struct TemplateCatalog {
    templates: BTreeMap<String, PromptTemplate>,
    defaults: BTreeMap<String, PromptTemplate>,
    store: Option<Arc<dyn KvStore>>,
}

impl TemplateCatalog {
    /// Catalog with built-in templates only, no persistence.
    pub fn new() -> Self {
        let mut templates = BTreeMap::new();
        for t in built_in_templates() {
            templates.insert(t.id.clone(), t);
        }
        let defaults = templates.clone();
        Self {
            templates,
            defaults,
            store: None,
        }
    }

    /// Catalog wired to a store; user templates are loaded immediately.
    pub fn with_store(store: Arc<dyn KvStore>) -> Result<Self> {
        let mut catalog = Self::new();
        if let Some(value) = store.load(USER_TEMPLATES_KEY)? {
            let user: Vec<PromptTemplate> = serde_json::from_value(value)?;
            for mut t in user {
                // A persisted entry can never shadow a built-in as built-in.
                t.built_in = false;
                catalog.templates.insert(t.id.clone(), t);
            }
        }
        catalog.store = Some(store);
        Ok(catalog)
    }

    /// Look up a template by id.
    pub fn get(&self, id: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| OrchestratorError::UnknownTemplate(id.to_string()))
    }

    /// All templates, built-ins first, each group ordered by id.
    pub fn list(&self) -> Vec<&PromptTemplate> {
        let mut all: Vec<&PromptTemplate> = self.templates.values().collect();
        all.sort_by_key(|t| (!t.built_in, t.id.clone()));
        all
    }

    /// Validate a template body before saving.
    pub fn validate(body: &PromptTemplate) -> ValidationResult {
        let mut problems = Vec::new();
        if body.id.trim().is_empty() {
            problems.push("template id must not be empty".to_string());
        }
        if body.instruction.trim().is_empty() {
            problems.push("instruction text must not be empty".to_string());
        }
        if body.required_fields.is_empty() {
            problems.push("at least one required output field is needed".to_string());
        }
        for slot in &body.slots {
            let placeholder = format!("{{{}}}", slot);
            if !body.instruction.contains(&placeholder) {
                problems.push(format!(
                    "declared slot '{}' does not appear in the instruction",
                    slot
                ));
            }
        }
        ValidationResult { problems }
    }

    /// Add a user-created template. Rejects invalid bodies and collisions
    /// with built-in ids.
    pub fn create(&mut self, mut template: PromptTemplate) -> Result<()> {
        let validation = Self::validate(&template);
        if !validation.is_valid() {
            return Err(OrchestratorError::InvalidConfig(
                validation.problems.join("; "),
            ));
        }
        if self
            .templates
            .get(&template.id)
            .is_some_and(|t| t.built_in)
        {
            return Err(OrchestratorError::ImmutableTemplate(template.id));
        }
        template.built_in = false;
        self.templates.insert(template.id.clone(), template);
        self.persist()
    }

    /// Replace a user-created template's body. Idempotent: applying the
    /// same body twice yields an identical stored template.
    pub fn update(&mut self, id: &str, mut body: PromptTemplate) -> Result<()> {
        let existing = self.get(id)?;
        if existing.built_in {
            return Err(OrchestratorError::ImmutableTemplate(id.to_string()));
        }
        let validation = Self::validate(&body);
        if !validation.is_valid() {
            return Err(OrchestratorError::InvalidConfig(
                validation.problems.join("; "),
            ));
        }
        body.id = id.to_string();
        body.built_in = false;
        self.templates.insert(id.to_string(), body);
        self.persist()
    }

    /// Remove a user-created template. Built-ins reject with
    /// [`ImmutableTemplate`](OrchestratorError::ImmutableTemplate).
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let existing = self.get(id)?;
        if existing.built_in {
            return Err(OrchestratorError::ImmutableTemplate(id.to_string()));
        }
        self.templates.remove(id);
        self.persist()
    }

    /// Restore a built-in template to its shipped default.
    pub fn reset_builtin(&mut self, id: &str) -> Result<()> {
        let default = self
            .defaults
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownTemplate(id.to_string()))?;
        self.templates.insert(id.to_string(), default);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(ref store) = self.store else {
            return Ok(());
        };
        let user: Vec<&PromptTemplate> =
            self.templates.values().filter(|t| !t.built_in).collect();
        store.save(USER_TEMPLATES_KEY, serde_json::to_value(user)?)
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Templates shipped with the catalog.
fn built_in_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new(
            "general",
            "General analysis",
            "Analyze the following content from \"{name}\" (last modified {modified}).\n\n{content}",
        )
        .with_slots(&["name", "modified", "content"])
        .built_in(),
        PromptTemplate::new(
            "summarize",
            "Quick summary",
            "Summarize this preview of \"{name}\" in two or three sentences.\n\n{preview}",
        )
        .with_slots(&["name", "preview"])
        .with_required_fields(&["summary", "relevance"])
        .built_in(),
        PromptTemplate::new(
            "categorize",
            "Category suggestions",
            "Suggest categories for \"{name}\" given this content:\n\n{content}",
        )
        .with_slots(&["name", "content"])
        .with_required_fields(&["categories", "relevance"])
        .with_params(GenerationParams::default().with_temperature(0.1))
        .built_in(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn item() -> ContentItem {
        ContentItem::new("id-1", "notes.md", "meeting notes about roadmap")
    }

    #[test]
    fn render_substitutes_item_slots() {
        let catalog = TemplateCatalog::new();
        let template = catalog.get("general").unwrap();
        let prompt = render(template, &item(), &HashMap::new()).unwrap();
        assert!(prompt.text.contains("notes.md"));
        assert!(prompt.text.contains("meeting notes about roadmap"));
        assert_eq!(prompt.format, OutputFormat::StructuredJson);
        assert!(prompt.text.contains("JSON object"));
    }

    #[test]
    fn render_fails_on_unresolved_slot() {
        let template = PromptTemplate::new("custom", "Custom", "Analyze {content} for {audience}")
            .with_slots(&["content", "audience"]);
        let err = render(&template, &item(), &HashMap::new()).unwrap_err();
        match err {
            OrchestratorError::UnresolvedSlot { slot, .. } => assert_eq!(slot, "audience"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn render_resolves_slot_from_context() {
        let template = PromptTemplate::new("custom", "Custom", "Analyze {content} for {audience}")
            .with_slots(&["content", "audience"]);
        let mut ctx = HashMap::new();
        ctx.insert("audience".to_string(), "researchers".to_string());
        let prompt = render(&template, &item(), &ctx).unwrap();
        assert!(prompt.text.contains("researchers"));
    }

    #[test]
    fn render_preserves_escaped_braces() {
        let template = PromptTemplate::new(
            "custom",
            "Custom",
            "Example output: {{\"summary\": \"...\"}}. Content: {content}",
        )
        .with_slots(&["content"]);
        let prompt = render(&template, &item(), &HashMap::new()).unwrap();
        assert!(prompt.text.contains(r#"{"summary": "..."}"#));
    }

    #[test]
    fn adapt_rewrites_for_free_text_provider() {
        let catalog = TemplateCatalog::new();
        let template = catalog.get("general").unwrap();
        let prompt = render(template, &item(), &HashMap::new()).unwrap();

        let adapted = adapt_for_provider(&prompt, false);
        assert_eq!(adapted.format, OutputFormat::LabeledSections);
        assert!(adapted.text.contains("## summary"));
        assert!(adapted.text.contains("## insights"));
        assert!(!adapted.text.contains("single JSON object"));
        // Pure adaptation: original untouched.
        assert_eq!(prompt.format, OutputFormat::StructuredJson);
        assert!(prompt.text.contains("single JSON object"));
    }

    #[test]
    fn adapt_is_identity_for_structured_provider() {
        let catalog = TemplateCatalog::new();
        let template = catalog.get("general").unwrap();
        let prompt = render(template, &item(), &HashMap::new()).unwrap();
        let adapted = adapt_for_provider(&prompt, true);
        assert_eq!(adapted.text, prompt.text);
        assert_eq!(adapted.format, OutputFormat::StructuredJson);
    }

    #[test]
    fn builtins_reject_remove_and_update() {
        let mut catalog = TemplateCatalog::new();
        assert!(matches!(
            catalog.remove("general"),
            Err(OrchestratorError::ImmutableTemplate(_))
        ));
        let body = PromptTemplate::new("general", "Hijack", "do {content}").with_slots(&["content"]);
        assert!(matches!(
            catalog.update("general", body),
            Err(OrchestratorError::ImmutableTemplate(_))
        ));
    }

    #[test]
    fn builtin_reset_restores_default() {
        let mut catalog = TemplateCatalog::new();
        let original = catalog.get("general").unwrap().clone();
        // Mutate through the map directly to simulate drift, then reset.
        catalog
            .templates
            .get_mut("general")
            .unwrap()
            .instruction = "drifted".into();
        catalog.reset_builtin("general").unwrap();
        assert_eq!(catalog.get("general").unwrap(), &original);
    }

    #[test]
    fn user_template_crud_round_trip() {
        let mut catalog = TemplateCatalog::new();
        let template = PromptTemplate::new("mine", "Mine", "Review {content}")
            .with_slots(&["content"]);
        catalog.create(template.clone()).unwrap();
        assert_eq!(catalog.get("mine").unwrap().name, "Mine");

        let updated = PromptTemplate::new("mine", "Mine v2", "Review {content} carefully")
            .with_slots(&["content"]);
        catalog.update("mine", updated).unwrap();
        assert_eq!(catalog.get("mine").unwrap().name, "Mine v2");

        catalog.remove("mine").unwrap();
        assert!(catalog.get("mine").is_err());
    }

    #[test]
    fn update_is_idempotent() {
        let mut catalog = TemplateCatalog::new();
        let template =
            PromptTemplate::new("mine", "Mine", "Review {content}").with_slots(&["content"]);
        catalog.create(template).unwrap();

        let body = PromptTemplate::new("mine", "Mine v2", "Review {content} twice")
            .with_slots(&["content"]);
        catalog.update("mine", body.clone()).unwrap();
        let first = catalog.get("mine").unwrap().clone();
        catalog.update("mine", body).unwrap();
        let second = catalog.get("mine").unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn validate_flags_missing_pieces() {
        let body = PromptTemplate {
            id: "".into(),
            name: "Bad".into(),
            slots: vec!["ghost".into()],
            instruction: "".into(),
            required_fields: vec![],
            params: GenerationParams::default(),
            built_in: false,
        };
        let result = TemplateCatalog::validate(&body);
        assert!(!result.is_valid());
        assert_eq!(result.problems.len(), 4);
    }

    #[test]
    fn create_rejects_builtin_id_collision() {
        let mut catalog = TemplateCatalog::new();
        let body =
            PromptTemplate::new("general", "Shadow", "do {content}").with_slots(&["content"]);
        assert!(matches!(
            catalog.create(body),
            Err(OrchestratorError::ImmutableTemplate(_))
        ));
    }

    #[test]
    fn user_templates_persist_through_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut catalog = TemplateCatalog::with_store(store.clone()).unwrap();
            let template = PromptTemplate::new("mine", "Mine", "Review {content}")
                .with_slots(&["content"]);
            catalog.create(template).unwrap();
        }
        let reloaded = TemplateCatalog::with_store(store).unwrap();
        assert_eq!(reloaded.get("mine").unwrap().name, "Mine");
        assert!(!reloaded.get("mine").unwrap().built_in);
    }

    #[test]
    fn list_orders_builtins_first() {
        let mut catalog = TemplateCatalog::new();
        let template = PromptTemplate::new("aaa-user", "User", "Review {content}")
            .with_slots(&["content"]);
        catalog.create(template).unwrap();
        let listed = catalog.list();
        assert!(listed.first().unwrap().built_in);
        assert_eq!(listed.last().unwrap().id, "aaa-user");
    }
}

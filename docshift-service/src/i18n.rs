use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};
use unic_langid::LanguageIdentifier;

/// Client-facing message catalogue using Fluent (thread-safe)
pub struct I18n {
    bundles: RwLock<HashMap<String, FluentBundle<FluentResource>>>,
    default_locale: String,
}

impl I18n {
    /// Create a new i18n service with embedded English messages
    pub fn new() -> Self {
        let i18n = Self {
            bundles: RwLock::new(HashMap::new()),
            default_locale: "en".to_string(),
        };

        i18n.load_embedded_en();

        i18n
    }

    /// Add a locale with translations
    pub fn add_locale(&self, locale: &str, content: &str) -> Result<(), String> {
        let lang_id: LanguageIdentifier = locale
            .parse()
            .map_err(|e| format!("Invalid locale '{}': {}", locale, e))?;

        let resource = FluentResource::try_new(content.to_string())
            .map_err(|(_, errors)| format!("Failed to parse Fluent resource: {:?}", errors))?;

        let mut bundle = FluentBundle::new_concurrent(vec![lang_id]);
        // Messages end up in JSON bodies; bidi isolation marks would only get in the way
        bundle.set_use_isolating(false);
        bundle
            .add_resource(resource)
            .map_err(|errors| format!("Failed to add resource to bundle: {:?}", errors))?;

        let mut bundles = self
            .bundles
            .write()
            .map_err(|_| "i18n bundle lock poisoned".to_string())?;
        bundles.insert(locale.to_string(), bundle);

        debug!(locale = %locale, "Loaded translations");

        Ok(())
    }

    /// Get a translated message
    pub fn get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> String {
        // Try requested locale, fall back to default, fall back to key
        self.try_get(locale, key, args)
            .or_else(|| self.try_get(&self.default_locale, key, args))
            .unwrap_or_else(|| key.to_string())
    }

    fn try_get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> Option<String> {
        let bundles = self.bundles.read().ok()?;
        let bundle = bundles.get(locale)?;
        let message = bundle.get_message(key)?;
        let pattern = message.value()?;

        let mut errors = vec![];
        let result = bundle.format_pattern(pattern, args, &mut errors);

        if !errors.is_empty() {
            warn!(key = %key, errors = ?errors, "Fluent formatting errors");
        }

        Some(result.to_string())
    }

    /// Get a translated message with arguments
    pub fn format(&self, locale: &str, key: &str, args: &[(&str, &str)]) -> String {
        let mut fluent_args = FluentArgs::new();
        for (k, v) in args {
            fluent_args.set(*k, *v);
        }
        self.get(locale, key, Some(&fluent_args))
    }

    fn load_embedded_en(&self) {
        let en_translations = r#"
# docshift - English messages

# Errors
error-job-not-found = Job not found: { $id }
error-job-active = Job { $id } is still { $status }
error-file-not-found = File not found
error-internal = An internal error occurred

# Job failures (shown to clients, never contain paths)
job-error-tool-unavailable = Conversion tool is not available: { $tool }
job-error-timeout = Conversion timed out after { $seconds } seconds
job-error-failed = Conversion failed: { $detail }
job-error-failed-no-detail = Conversion failed
job-error-output-missing = Conversion finished without producing an output file
job-error-input-missing = Input file is no longer available
job-error-interrupted = Conversion was interrupted unexpectedly

# Jobs
job-accepted = Conversion job accepted
job-deleted = Job removed

# Health
health-status-healthy = Service is healthy
health-status-degraded = Service is degraded: { $reason }
"#;

        if let Err(e) = self.add_locale("en", en_translations) {
            warn!(error = %e, "Failed to load embedded English messages");
        }
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_message() {
        let i18n = I18n::new();

        let msg = i18n.get("en", "job-accepted", None);
        assert_eq!(msg, "Conversion job accepted");
    }

    #[test]
    fn test_format_message() {
        let i18n = I18n::new();

        let msg = i18n.format("en", "job-error-timeout", &[("seconds", "30")]);
        assert_eq!(msg, "Conversion timed out after 30 seconds");
    }

    #[test]
    fn test_fallback_to_key() {
        let i18n = I18n::new();

        let msg = i18n.get("en", "nonexistent-key", None);
        assert_eq!(msg, "nonexistent-key");
    }

    #[test]
    fn test_fallback_to_default_locale() {
        let i18n = I18n::new();

        // Request French (not loaded), should fall back to English
        let msg = i18n.get("fr", "error-internal", None);
        assert_eq!(msg, "An internal error occurred");
    }
}

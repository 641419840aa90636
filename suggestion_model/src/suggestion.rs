use crate::source_identifier::SourceIdentifier;

/// Sentinel shortcut id meaning "never shortcut this suggestion, no matter
/// how many times it is clicked" (spec §3).
pub const NEVER_SHORTCUT: &str = "_-1";

/// Hints the display layer about how a suggestion's icon and text should be
/// laid out. Sources that don't care can leave this at `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuggestionFormat {
    #[default]
    Default,
    Quickcontact,
    Histogram,
}

/// Where clicking (or long-pressing) a suggestion should take the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchIntent {
    pub action: Option<String>,
    pub data_uri: Option<String>,
    pub query: Option<String>,
    pub extra_data: Option<String>,
    pub component: Option<String>,
}

/// A single row a source returned for a query, or a previously shortcutted
/// suggestion replayed from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub source: SourceIdentifier,
    pub format: SuggestionFormat,
    pub title: String,
    pub description: Option<String>,
    pub icon1: Option<String>,
    pub icon2: Option<String>,
    pub background_color: Option<u32>,
    pub launch: LaunchIntent,
    /// Opaque id this suggestion may be shortcutted under, or
    /// [`NEVER_SHORTCUT`] to opt out entirely.
    pub shortcut_id: String,
    /// Keep this suggestion pinned after the normal ranked results
    /// regardless of its source's ranking.
    pub pin_to_bottom: bool,
    /// Render a "refreshing" affordance until a validated refresh of this
    /// shortcut arrives.
    pub spinner_while_refreshing: bool,
}

impl Suggestion {
    pub fn builder(source: SourceIdentifier, title: impl Into<String>) -> SuggestionBuilder {
        SuggestionBuilder::new(source, title)
    }

    pub fn is_shortcuttable(&self) -> bool {
        self.shortcut_id != NEVER_SHORTCUT
    }
}

/// Builds a [`Suggestion`], defaulting every field a source doesn't care
/// about rather than forcing every source implementation to spell out the
/// full struct literal.
pub struct SuggestionBuilder {
    source: SourceIdentifier,
    title: String,
    format: SuggestionFormat,
    description: Option<String>,
    icon1: Option<String>,
    icon2: Option<String>,
    background_color: Option<u32>,
    launch: LaunchIntent,
    shortcut_id: Option<String>,
    pin_to_bottom: bool,
    spinner_while_refreshing: bool,
}

impl SuggestionBuilder {
    fn new(source: SourceIdentifier, title: impl Into<String>) -> Self {
        Self {
            source,
            title: title.into(),
            format: SuggestionFormat::default(),
            description: None,
            icon1: None,
            icon2: None,
            background_color: None,
            launch: LaunchIntent::default(),
            shortcut_id: None,
            pin_to_bottom: false,
            spinner_while_refreshing: false,
        }
    }

    pub fn format(mut self, format: SuggestionFormat) -> Self {
        self.format = format;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn icon1(mut self, icon: impl Into<String>) -> Self {
        self.icon1 = Some(icon.into());
        self
    }

    pub fn icon2(mut self, icon: impl Into<String>) -> Self {
        self.icon2 = Some(icon.into());
        self
    }

    pub fn background_color(mut self, color: u32) -> Self {
        self.background_color = Some(color);
        self
    }

    pub fn launch(mut self, launch: LaunchIntent) -> Self {
        self.launch = launch;
        self
    }

    pub fn shortcut_id(mut self, id: impl Into<String>) -> Self {
        self.shortcut_id = Some(id.into());
        self
    }

    pub fn never_shortcut(mut self) -> Self {
        self.shortcut_id = Some(NEVER_SHORTCUT.to_string());
        self
    }

    pub fn pin_to_bottom(mut self, pin: bool) -> Self {
        self.pin_to_bottom = pin;
        self
    }

    pub fn spinner_while_refreshing(mut self, spin: bool) -> Self {
        self.spinner_while_refreshing = spin;
        self
    }

    pub fn build(self) -> Suggestion {
        Suggestion {
            source: self.source,
            format: self.format,
            title: self.title,
            description: self.description,
            icon1: self.icon1,
            icon2: self.icon2,
            background_color: self.background_color,
            launch: self.launch,
            shortcut_id: self.shortcut_id.unwrap_or_else(|| NEVER_SHORTCUT.to_string()),
            pin_to_bottom: self.pin_to_bottom,
            spinner_while_refreshing: self.spinner_while_refreshing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_never_shortcut() {
        let source = SourceIdentifier::new("pkg", "Cls");
        let suggestion = Suggestion::builder(source, "title").build();
        assert_eq!(suggestion.shortcut_id, NEVER_SHORTCUT);
        assert!(!suggestion.is_shortcuttable());
    }

    #[test]
    fn explicit_shortcut_id_is_shortcuttable() {
        let source = SourceIdentifier::new("pkg", "Cls");
        let suggestion = Suggestion::builder(source, "title")
            .shortcut_id("abc123")
            .build();
        assert!(suggestion.is_shortcuttable());
    }
}

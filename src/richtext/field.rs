use std::fmt;
use std::str::FromStr;

/// Rendering hint passed to the markdown renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    Headline,
    Subheadline,
    Body,
    Callout,
}

/// The article attributes that carry a rendered rich-text blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RichTextField {
    Title,
    Body,
    Summary,
    CriticalAnalysis,
    LogicalFallacies,
    SourceAnalysis,
    RelationToTopic,
    AdditionalInsights,
}

/// Static mapping for one field
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: RichTextField,
    pub name: &'static str,
    pub source_column: &'static str,
    pub blob_column: &'static str,
    pub style: TextStyle,
}

/// Indexed by `RichTextField as usize`
pub const FIELD_SPECS: [FieldSpec; 8] = [
    FieldSpec {
        field: RichTextField::Title,
        name: "title",
        source_column: "title",
        blob_column: "title_blob",
        style: TextStyle::Headline,
    },
    FieldSpec {
        field: RichTextField::Body,
        name: "body",
        source_column: "body",
        blob_column: "body_blob",
        style: TextStyle::Body,
    },
    FieldSpec {
        field: RichTextField::Summary,
        name: "summary",
        source_column: "summary",
        blob_column: "summary_blob",
        style: TextStyle::Subheadline,
    },
    FieldSpec {
        field: RichTextField::CriticalAnalysis,
        name: "critical_analysis",
        source_column: "critical_analysis",
        blob_column: "critical_analysis_blob",
        style: TextStyle::Body,
    },
    FieldSpec {
        field: RichTextField::LogicalFallacies,
        name: "logical_fallacies",
        source_column: "logical_fallacies",
        blob_column: "logical_fallacies_blob",
        style: TextStyle::Body,
    },
    FieldSpec {
        field: RichTextField::SourceAnalysis,
        name: "source_analysis",
        source_column: "source_analysis",
        blob_column: "source_analysis_blob",
        style: TextStyle::Body,
    },
    FieldSpec {
        field: RichTextField::RelationToTopic,
        name: "relation_to_topic",
        source_column: "relation_to_topic",
        blob_column: "relation_to_topic_blob",
        style: TextStyle::Callout,
    },
    FieldSpec {
        field: RichTextField::AdditionalInsights,
        name: "additional_insights",
        source_column: "additional_insights",
        blob_column: "additional_insights_blob",
        style: TextStyle::Callout,
    },
];

impl RichTextField {
    pub const ALL: [RichTextField; 8] = [
        RichTextField::Title,
        RichTextField::Body,
        RichTextField::Summary,
        RichTextField::CriticalAnalysis,
        RichTextField::LogicalFallacies,
        RichTextField::SourceAnalysis,
        RichTextField::RelationToTopic,
        RichTextField::AdditionalInsights,
    ];

    pub fn spec(self) -> &'static FieldSpec {
        &FIELD_SPECS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn source_column(self) -> &'static str {
        self.spec().source_column
    }

    pub fn blob_column(self) -> &'static str {
        self.spec().blob_column
    }

    pub fn style(self) -> TextStyle {
        self.spec().style
    }
}

impl fmt::Display for RichTextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RichTextField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FIELD_SPECS
            .iter()
            .find(|spec| spec.name == s)
            .map(|spec| spec.field)
            .ok_or_else(|| format!("unknown rich-text field '{s}'"))
    }
}

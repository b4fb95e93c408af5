//! Issue categories and their presentation lookup

use serde::{Deserialize, Serialize};

/// Known issue categories; anything unrecognised is `Unknown`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Pothole,
    Graffiti,
    Unknown,
}

struct CategoryStyle {
    category: IssueCategory,
    label: &'static str,
    color: &'static str,
}

const CATEGORY_STYLES: [CategoryStyle; 3] = [
    CategoryStyle {
        category: IssueCategory::Pothole,
        label: "pothole",
        color: "#4ECDC4",
    },
    CategoryStyle {
        category: IssueCategory::Graffiti,
        label: "graffiti",
        color: "#FF6B6B",
    },
    CategoryStyle {
        category: IssueCategory::Unknown,
        label: "unknown",
        color: "#999999",
    },
];

impl IssueCategory {
    /// Map a free-form label to a category, case-insensitively
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        CATEGORY_STYLES
            .iter()
            .find(|style| style.label == label)
            .map_or(IssueCategory::Unknown, |style| style.category)
    }

    fn style(self) -> &'static CategoryStyle {
        CATEGORY_STYLES
            .iter()
            .find(|style| style.category == self)
            .unwrap_or(&CATEGORY_STYLES[2])
    }

    /// Marker color used by the map
    #[must_use]
    pub fn color(self) -> &'static str {
        self.style().color
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.style().label
    }
}

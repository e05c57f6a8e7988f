use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchImgFilterReq {
    #[serde(rename = "ImgURIList", default)]
    pub img_uri_list: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchImgFilterRes {
    #[serde(rename = "ImgFilterResList")]
    pub img_filter_res_list: Vec<ImgFilterRes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImgFilterRes {
    #[serde(rename = "URI")]
    pub uri: String,
    #[serde(rename = "Pass")]
    pub pass: bool,
}

impl From<Verdict> for ImgFilterRes {
    fn from(verdict: Verdict) -> Self {
        Self {
            uri: verdict.uri,
            pass: verdict.pass,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageRef {
    #[serde(rename = "URI")]
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabelsRes {
    #[serde(rename = "URI")]
    pub uri: String,
    #[serde(rename = "Labels")]
    pub labels: Vec<String>,
}

/// Pass/fail outcome for one image, as cached and as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub uri: String,
    pub pass: bool,
}

/// Ordinal likelihood scale used by the classifier. Variant order is the
/// severity order, so thresholds compare with `>=`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    #[default]
    Unknown,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Adult,
    Spoof,
    Medical,
    Violence,
    Racy,
}

/// Safe-search result for a single image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SafetyAnnotation {
    pub adult: Likelihood,
    pub spoof: Likelihood,
    pub medical: Likelihood,
    pub violence: Likelihood,
    pub racy: Likelihood,
}

impl SafetyAnnotation {
    pub fn likelihood(&self, category: Category) -> Likelihood {
        match category {
            Category::Adult => self.adult,
            Category::Spoof => self.spoof,
            Category::Medical => self.medical,
            Category::Violence => self.violence,
            Category::Racy => self.racy,
        }
    }
}

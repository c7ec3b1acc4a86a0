use crate::error::{AnalyticsError, Result};
use crate::types::PullRequest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

const DEFAULT_BUCKET_WIDTH_HOURS: f64 = 1.0;

/// Upper bound on the number of histogram buckets a single request may ask for.
pub const MAX_HISTOGRAM_BUCKETS: usize = 100_000;

/// Elapsed time from creation to merge for one merged pull request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeTimeSample {
    pub id: u64,
    pub author: String,
    pub hours: f64,
}

/// Count of samples within `[lower_hours, upper_hours)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub lower_hours: f64,
    pub upper_hours: f64,
    pub count: usize,
}

/// Bucketing parameters for the hours-to-merge histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramOptions {
    /// Width of each bucket in hours.
    pub bucket_width_hours: f64,
    /// Samples above this are clamped to it, folding the long tail into the
    /// last bucket.
    pub max_hours: Option<f64>,
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self {
            bucket_width_hours: DEFAULT_BUCKET_WIDTH_HOURS,
            max_hours: None,
        }
    }
}

impl HistogramOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.bucket_width_hours.is_finite() && self.bucket_width_hours > 0.0) {
            return Err(AnalyticsError::InvalidParameter {
                name: "bucket_width_hours",
                reason: format!("{} is not a positive number", self.bucket_width_hours),
            });
        }
        validate_max_hours(self.max_hours)
    }

    fn clamp(&self, hours: f64) -> f64 {
        self.max_hours.map_or(hours, |max| hours.min(max))
    }
}

/// Rejects a cap that is negative or not finite.
pub fn validate_max_hours(max_hours: Option<f64>) -> Result<()> {
    match max_hours {
        Some(max) if !(max.is_finite() && max >= 0.0) => Err(AnalyticsError::InvalidParameter {
            name: "max_hours",
            reason: format!("{max} is not a non-negative number"),
        }),
        _ => Ok(()),
    }
}

/// One sample per merged pull request, in input order.
pub fn merge_time_samples(prs: &[PullRequest]) -> Vec<MergeTimeSample> {
    prs.iter()
        .filter_map(|pr| {
            pr.hours_to_merge().map(|hours| MergeTimeSample {
                id: pr.id,
                author: pr.author.clone(),
                hours,
            })
        })
        .collect()
}

/// Buckets hours-to-merge into contiguous fixed-width bins starting at zero.
///
/// Every bucket between zero and the highest occupied one is emitted, empty
/// ones included. With no merged pull requests the result is empty. A width
/// so narrow that more than [`MAX_HISTOGRAM_BUCKETS`] buckets would be needed
/// is rejected.
pub fn hours_to_merge_histogram(
    prs: &[PullRequest],
    options: &HistogramOptions,
) -> Result<Vec<HistogramBucket>> {
    options.validate()?;
    let width = options.bucket_width_hours;

    let hours: Vec<f64> = merge_time_samples(prs)
        .iter()
        .map(|sample| options.clamp(sample.hours).max(0.0))
        .collect();

    let Some(highest) = hours.iter().copied().max_by(f64::total_cmp) else {
        return Ok(Vec::new());
    };

    let last = (highest / width).floor();
    if !(last < MAX_HISTOGRAM_BUCKETS as f64) {
        return Err(AnalyticsError::InvalidParameter {
            name: "bucket_width_hours",
            reason: format!(
                "{width} would need more than {MAX_HISTOGRAM_BUCKETS} buckets to cover {highest} hours"
            ),
        });
    }

    let mut counts = vec![0usize; last as usize + 1];
    for sample in hours {
        counts[(sample / width).floor() as usize] += 1;
    }

    Ok(counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBucket {
            lower_hours: i as f64 * width,
            upper_hours: (i + 1) as f64 * width,
            count,
        })
        .collect())
}

/// Descriptive statistics over one quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub min: f64,
    pub max: f64,
}

impl Distribution {
    fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let count = values.len();
        Some(Self {
            count,
            mean: values.iter().sum::<f64>() / count as f64,
            median: quantile(&values, 0.5),
            p90: quantile(&values, 0.9),
            min: values[0],
            max: values[count - 1],
        })
    }
}

/// Linear-interpolated quantile of sorted, non-empty `values`.
fn quantile(values: &[f64], q: f64) -> f64 {
    let position = q * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    values[lower] + (values[upper] - values[lower]) * fraction
}

/// Summary statistics over merged pull requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeSummary {
    pub hours_to_merge: Option<Distribution>,
    pub total_changes: Option<Distribution>,
}

pub fn summarize(prs: &[PullRequest]) -> MergeSummary {
    let merged: Vec<&PullRequest> = prs.iter().filter(|pr| pr.merged_at.is_some()).collect();

    MergeSummary {
        hours_to_merge: Distribution::from_values(
            merged.iter().filter_map(|pr| pr.hours_to_merge()).collect(),
        ),
        total_changes: Distribution::from_values(
            merged.iter().map(|pr| pr.total_changes() as f64).collect(),
        ),
    }
}

/// Hours-to-merge samples grouped by author, for per-author box plots.
pub fn hours_to_merge_by_author(
    prs: &[PullRequest],
    max_hours: Option<f64>,
) -> Result<BTreeMap<String, Vec<f64>>> {
    validate_max_hours(max_hours)?;

    let mut by_author: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for sample in merge_time_samples(prs) {
        let hours = max_hours.map_or(sample.hours, |max| sample.hours.min(max));
        by_author.entry(sample.author).or_default().push(hours);
    }
    Ok(by_author)
}

/// Lines changed (additions plus deletions) per author, over every stored
/// pull request whether merged or not.
pub fn changes_by_author(prs: &[PullRequest]) -> BTreeMap<String, u64> {
    let mut by_author: BTreeMap<String, u64> = BTreeMap::new();
    for pr in prs {
        *by_author.entry(pr.author.clone()).or_default() += pr.total_changes();
    }
    by_author
}

/// One point of the size-versus-latency scatter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangesVsHours {
    pub id: u64,
    pub author: String,
    pub hours_to_merge: f64,
    pub total_changes: u64,
}

/// Hours-to-merge against total changes for each merged pull request, with
/// hours clamped to `max_hours` when set.
pub fn changes_vs_hours_to_merge(
    prs: &[PullRequest],
    max_hours: Option<f64>,
) -> Result<Vec<ChangesVsHours>> {
    validate_max_hours(max_hours)?;

    Ok(prs
        .iter()
        .filter_map(|pr| {
            let hours = pr.hours_to_merge()?;
            Some(ChangesVsHours {
                id: pr.id,
                author: pr.author.clone(),
                hours_to_merge: max_hours.map_or(hours, |max| hours.min(max)),
                total_changes: pr.total_changes(),
            })
        })
        .collect())
}

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\w\-& ]+\] ").expect("title tag pattern is valid"));

/// The leading verb of a pull request title, lowercased, with `[tag] `
/// prefixes and colons removed and common tenses folded together.
pub fn title_verb(title: &str) -> String {
    let stripped = TITLE_TAG.replace_all(title, "").to_lowercase();
    let verb = stripped
        .split(' ')
        .next()
        .unwrap_or_default()
        .replace(':', "");

    match verb.as_str() {
        "adding" | "added" => "add".to_string(),
        "fixing" => "fix".to_string(),
        "removing" => "remove".to_string(),
        _ => verb,
    }
}

/// The `n` most common title verbs with their counts, most common first.
/// Ties are broken alphabetically.
pub fn title_verb_counts(prs: &[PullRequest], n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for pr in prs {
        *counts.entry(title_verb(&pr.title)).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

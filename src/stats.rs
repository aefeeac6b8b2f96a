//! Coverage statistics describing how much of the corpus a vocabulary accounts for.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::counter::TokenCount;

/// Position of the lowest-ranked selected token that is more frequent than the boundary tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBreak {
    /// The token and its count.
    pub token: TokenCount,
    /// 1-based rank of the token within the vocabulary.
    pub rank: usize,
}

/// Aggregate statistics over a frequency table and the vocabulary selected from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    /// Total token occurrences in the corpus.
    pub total_tokens: u64,
    /// Distinct tokens in the corpus.
    pub distinct_tokens: usize,
    /// Number of tokens selected into the vocabulary.
    pub selected_tokens: usize,
    /// Occurrences accounted for by the selected tokens.
    pub selected_occurrences: u64,
    /// Share of all occurrences covered by the selection, in percent rounded to 2 decimals.
    pub coverage_percent: f64,
    /// Most frequent selected token.
    pub most_frequent: Option<TokenCount>,
    /// Least frequent selected token.
    pub least_frequent: Option<TokenCount>,
    /// Number of selected tokens sharing the least frequent count.
    pub boundary_tier: usize,
    /// Lowest-ranked selected token whose count exceeds the boundary tier, if any.
    pub above_boundary: Option<TierBreak>,
}

impl CoverageStats {
    /// Computes statistics for `selected`, which must be ordered by non-increasing count.
    #[must_use]
    pub fn compute(total_tokens: u64, distinct_tokens: usize, selected: &[TokenCount]) -> Self {
        let selected_occurrences: u64 = selected.iter().map(|tc| tc.count).sum();
        let least_frequent = selected.last().cloned();
        let boundary_count = least_frequent.as_ref().map(|tc| tc.count);
        let boundary_tier = boundary_count.map_or(0, |count| {
            selected
                .iter()
                .rev()
                .take_while(|tc| tc.count == count)
                .count()
        });
        let above_boundary = selected
            .len()
            .checked_sub(boundary_tier + 1)
            .map(|index| TierBreak {
                token: selected[index].clone(),
                rank: index + 1,
            });

        let coverage_percent = if total_tokens == 0 {
            0.0
        } else {
            let exact = selected_occurrences as f64 / total_tokens as f64 * 100.0;
            (exact * 100.0).round() / 100.0
        };

        Self {
            total_tokens,
            distinct_tokens,
            selected_tokens: selected.len(),
            selected_occurrences,
            coverage_percent,
            most_frequent: selected.first().cloned(),
            least_frequent,
            boundary_tier,
            above_boundary,
        }
    }
}

impl fmt::Display for CoverageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Your text file has {} words in total", self.total_tokens)?;
        writeln!(f, "It has {} unique words", self.distinct_tokens)?;
        writeln!(
            f,
            "Your top-{} words are {:.2} percent of all words",
            self.selected_tokens,
            self.coverage_percent
        )?;
        let (Some(most), Some(least)) = (&self.most_frequent, &self.least_frequent) else {
            return writeln!(f, "No words were selected");
        };
        writeln!(
            f,
            "Your most common word \"{}\" occurred {} times",
            most.token, most.count
        )?;
        writeln!(
            f,
            "The least common word in your top-k is \"{}\" with {} times",
            least.token, least.count
        )?;
        writeln!(
            f,
            "{} of the selected words occur exactly {} times",
            self.boundary_tier, least.count
        )?;
        match &self.above_boundary {
            Some(tier) => writeln!(
                f,
                "The first word with more occurrences is \"{}\" with {} times at place {}",
                tier.token.token, tier.token.count, tier.rank
            ),
            None => writeln!(f, "All selected words share that count"),
        }
    }
}

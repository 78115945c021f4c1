use crate::error::{DgdaError, Result};
use std::collections::BTreeSet;

fn check_lengths(labels: usize, other: usize) -> Result<()> {
    if labels == 0 {
        return Err(DgdaError::Metric("no samples".to_string()));
    }
    if labels != other {
        return Err(DgdaError::Metric(format!(
            "{labels} labels but {other} predictions"
        )));
    }
    Ok(())
}

/// Micro-averaged F1. With one label per node this is the accuracy.
pub fn eval_micro_f1(labels: &[i64], preds: &[i64]) -> Result<f64> {
    check_lengths(labels.len(), preds.len())?;
    let correct = labels.iter().zip(preds).filter(|(l, p)| l == p).count();
    Ok(correct as f64 / labels.len() as f64)
}

/// Unweighted mean of per-class F1 over every class seen in labels or predictions.
pub fn eval_macro_f1(labels: &[i64], preds: &[i64]) -> Result<f64> {
    check_lengths(labels.len(), preds.len())?;
    let classes: BTreeSet<i64> = labels.iter().chain(preds).copied().collect();

    let total: f64 = classes
        .iter()
        .map(|class| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (label, pred) in labels.iter().zip(preds) {
                match (label == class, pred == class) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            if tp == 0 {
                0.0
            } else {
                2.0 * tp as f64 / (2 * tp + fp + fn_) as f64
            }
        })
        .sum();

    Ok(total / classes.len() as f64)
}

/// Area under the ROC curve for binary labels, from the Mann-Whitney U
/// statistic with average ranks for tied scores. Label `1` is positive.
pub fn eval_roc_auc(labels: &[i64], scores: &[f32]) -> Result<f64> {
    check_lengths(labels.len(), scores.len())?;

    let positives = labels.iter().filter(|l| **l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(DgdaError::Metric(
            "ROC AUC needs both positive and negative labels".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut positive_rank_sum = 0f64;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied scores share the mean rank of their run
        let rank = (start + end) as f64 / 2.0 + 1.0;
        positive_rank_sum += rank * order[start..=end].iter().filter(|i| labels[**i] == 1).count() as f64;
        start = end + 1;
    }

    let pos = positives as f64;
    let u = positive_rank_sum - pos * (pos + 1.0) / 2.0;
    Ok(u / (pos * negatives as f64))
}

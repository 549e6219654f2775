/*
 * Groups pending files into ordered batches bounded by a character budget.
 *
 * Planning is a greedy single pass over the pending list: files are appended to the
 * current batch while the running character sum stays within the threshold. A file
 * whose own character count reaches the threshold is always emitted alone, so no
 * file is ever split or dropped. The input order is preserved both inside each batch
 * and across batches.
 */

/*
 * A file waiting to be summarized, identified by its relative path. Unknown character
 * counts are represented as 0 by the caller.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: String,
    pub char_count: usize,
}

impl PendingFile {
    pub fn new(path: impl Into<String>, char_count: usize) -> Self {
        PendingFile {
            path: path.into(),
            char_count,
        }
    }
}

/*
 * An ordered group of file paths summarized together in one model invocation.
 * `char_count` is the sum of the member files' counts. A batch only exceeds the
 * planning threshold when it is a singleton whose file alone is larger than the
 * threshold (`is_oversized`).
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    paths: Vec<String>,
    char_count: usize,
    oversized: bool,
}

impl Batch {
    fn singleton(file: &PendingFile, threshold: usize) -> Self {
        Batch {
            paths: vec![file.path.clone()],
            char_count: file.char_count,
            oversized: file.char_count > threshold,
        }
    }

    /* Member paths, in pending order. */
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn char_count(&self) -> usize {
        self.char_count
    }

    /*
     * True for a single-file batch whose file alone exceeds the threshold. Such a
     * batch is still sent.
     */
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[cfg(test)]
    pub fn from_paths(paths: &[&str], char_count: usize) -> Self {
        Batch {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            char_count,
            oversized: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    NonPositiveThreshold,
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanError::NonPositiveThreshold => {
                write!(f, "Batch threshold must be greater than zero")
            }
        }
    }
}

impl std::error::Error for PlanError {}

pub type Result<T> = std::result::Result<T, PlanError>;

/*
 * Splits `pending` into batches whose aggregate character count does not exceed
 * `threshold`. Files with a count at or above the threshold flush the current batch
 * and are emitted as singletons.
 */
pub fn plan_batches(pending: &[PendingFile], threshold: usize) -> Result<Vec<Batch>> {
    if threshold == 0 {
        return Err(PlanError::NonPositiveThreshold);
    }

    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_sum = 0usize;

    for file in pending {
        if file.char_count >= threshold {
            if !current.is_empty() {
                batches.push(Batch {
                    paths: std::mem::take(&mut current),
                    char_count: current_sum,
                    oversized: false,
                });
            }
            current_sum = 0;
            log::debug!(
                "BatchPlanner: '{}' ({} chars) reaches threshold {threshold}, emitting alone.",
                file.path,
                file.char_count
            );
            batches.push(Batch::singleton(file, threshold));
        } else if current_sum + file.char_count <= threshold {
            current.push(file.path.clone());
            current_sum += file.char_count;
        } else {
            batches.push(Batch {
                paths: std::mem::take(&mut current),
                char_count: current_sum,
                oversized: false,
            });
            current.push(file.path.clone());
            current_sum = file.char_count;
        }
    }

    if !current.is_empty() {
        batches.push(Batch {
            paths: current,
            char_count: current_sum,
            oversized: false,
        });
    }

    log::debug!(
        "BatchPlanner: Planned {} batches for {} pending files (threshold {threshold}).",
        batches.len(),
        pending.len()
    );
    Ok(batches)
}

/*
 * Number of model invocations the batch phase will need for `pending`.
 */
pub fn estimate_invocations(pending: &[PendingFile], threshold: usize) -> Result<usize> {
    Ok(plan_batches(pending, threshold)?.len())
}

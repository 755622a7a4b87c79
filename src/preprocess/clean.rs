use crate::error::PreprocessError;

/// True for codes the device emits when a sample was dropped or saturated.
pub fn is_missing(code: i32, max_code: i32) -> bool {
    code == 0 || code > max_code
}

/// Replaces missing codes by linear interpolation over sample index.
///
/// Gaps at either edge take the nearest valid value. Fails only when no
/// sample in the window is valid.
pub fn clean_data(samples: &[i32], max_code: i32) -> Result<Vec<f64>, PreprocessError> {
    let mut cleaned: Vec<f64> = samples.iter().map(|&v| v as f64).collect();
    let mut previous: Option<usize> = None;
    for idx in 0..samples.len() {
        if is_missing(samples[idx], max_code) {
            continue;
        }
        let gap_start = previous.map_or(0, |p| p + 1);
        if gap_start < idx {
            match previous {
                Some(p) => {
                    let (x0, y0) = (p as f64, cleaned[p]);
                    let slope = (cleaned[idx] - y0) / (idx as f64 - x0);
                    for (gap, value) in cleaned[gap_start..idx].iter_mut().enumerate() {
                        let x = (gap_start + gap) as f64;
                        *value = y0 + slope * (x - x0);
                    }
                }
                None => {
                    let head = cleaned[idx];
                    cleaned[..idx].fill(head);
                }
            }
        }
        previous = Some(idx);
    }
    let last_valid = previous.ok_or(PreprocessError::AllMissing)?;
    let tail = cleaned[last_valid];
    cleaned[last_valid + 1..].fill(tail);
    Ok(cleaned)
}

use getrandom::getrandom;

pub const JOB_ID_BYTES: usize = 4;
const SLUG_MAX_LEN: usize = 40;
const SLUG_FALLBACK: &str = "prompt";

pub fn generate_job_id() -> Result<String, String> {
    let mut bytes = [0_u8; JOB_ID_BYTES];
    getrandom(&mut bytes).map_err(|err| format!("failed to generate job id randomness: {err}"))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// Generates ids until `exists` reports a free one.
pub fn allocate_job_id_with_retry(
    max_attempts: usize,
    exists: impl Fn(&str) -> bool,
) -> Result<String, String> {
    for _ in 0..max_attempts {
        let job_id = generate_job_id()?;
        if !exists(&job_id) {
            return Ok(job_id);
        }
    }
    Err(format!(
        "failed to allocate unique job id after {max_attempts} attempts"
    ))
}

/// Job ids arrive from callers and end up in file names.
pub fn validate_job_id(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("job id must be non-empty".to_string());
    }
    if value.len() > 64 {
        return Err("job id must be at most 64 characters".to_string());
    }
    if value.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Ok(());
    }
    Err("job id must use only hexadecimal characters".to_string())
}

/// Lowercase, dash-separated, filesystem-safe prefix of `text`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            let dash = pending_dash && !slug.is_empty();
            if slug.len() + usize::from(dash) + 1 > SLUG_MAX_LEN {
                break;
            }
            if dash {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        trimmed.to_string()
    }
}

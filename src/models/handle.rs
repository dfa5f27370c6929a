//! URL handle derivation.
//!
//! The target rejects empty handles and handles that do not start with a
//! letter, so every derived handle is normalized to `^[a-z][a-z0-9-]*$`.

/// Lower-cases, folds common Latin diacritics, collapses every run of
/// characters outside `[a-z0-9]` into one hyphen and trims hyphens.
///
/// May return an empty string; use [`make_handle`] for a guaranteed handle.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_hyphen = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        // Combining marks left over from decomposed input carry no letter.
        if ('\u{0300}'..='\u{036f}').contains(&ch) {
            continue;
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            push_alnum(&mut out, &mut pending_hyphen, ch);
            continue;
        }
        let folded = fold(ch);
        if folded.is_empty() {
            pending_hyphen = true;
            continue;
        }
        for c in folded.chars() {
            push_alnum(&mut out, &mut pending_hyphen, c);
        }
    }

    out
}

fn push_alnum(out: &mut String, pending_hyphen: &mut bool, c: char) {
    if *pending_hyphen && !out.is_empty() {
        out.push('-');
    }
    *pending_hyphen = false;
    out.push(c);
}

/// Derives a handle from the first candidate that slugifies to something.
///
/// Results that do not start with a letter get `prefix` prepended
/// (`"123"` → `"product-123"`). When every candidate is empty the handle
/// falls back to `prefix-<fallback_id>` so it stays unique per entity.
pub fn make_handle(prefix: &str, candidates: &[&str], fallback_id: i64) -> String {
    let prefix = match slugify(prefix) {
        p if p.starts_with(|c: char| c.is_ascii_lowercase()) => p,
        _ => "item".to_string(),
    };

    for candidate in candidates {
        let slug = slugify(candidate);
        if slug.is_empty() {
            continue;
        }
        if slug.starts_with(|c: char| c.is_ascii_lowercase()) {
            return slug;
        }
        return format!("{}-{}", prefix, slug);
    }

    format!("{}-{}", prefix, slugify(&fallback_id.to_string()))
}

fn fold(ch: char) -> &'static str {
    match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'ğ' => "g",
        'ì' | 'í' | 'î' | 'ï' | 'ı' | 'ī' | 'į' => "i",
        'ł' => "l",
        'ñ' | 'ń' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'œ' => "oe",
        'ř' => "r",
        'ś' | 'ş' | 'š' | 'ș' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'ț' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => "",
    }
}

//! Exploit vectors

use serde::{Deserialize, Serialize};

/// An adversarial payload and the category it is reported under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vector {
    pub payload: String,
    pub category: String,
}

impl Vector {
    pub fn new(payload: &str, category: &str) -> Self {
        Self {
            payload: payload.to_string(),
            category: category.to_string(),
        }
    }

    /// Vector whose category comes from the sanitized characters it carries
    pub fn inferred(payload: &str, sanitized_chars: &[String]) -> Self {
        Self::new(payload, &infer_category(payload, sanitized_chars))
    }
}

/// `sanitized:<>` for a payload carrying `<` and `>`, `generic` for none
pub fn infer_category(payload: &str, sanitized_chars: &[String]) -> String {
    let overlap: Vec<&str> = sanitized_chars
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty() && payload.contains(c))
        .collect();

    if overlap.is_empty() {
        "generic".to_string()
    } else {
        format!("sanitized:{}", overlap.concat())
    }
}

/// Ordered, deduplicated vectors
#[derive(Debug, Clone, Default)]
pub struct VectorSet {
    vectors: Vec<Vector>,
}

impl VectorSet {
    pub fn new(vectors: Vec<Vector>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let vectors = vectors
            .into_iter()
            .filter(|v| seen.insert(v.payload.clone()))
            .collect();
        Self { vectors }
    }

    /// Parse vector file lines.
    ///
    /// `CATEGORY: name` lines label the payloads below them. Payloads before
    /// any header get a category inferred from `sanitized_chars`. Blank lines
    /// are skipped.
    pub fn from_lines<S: AsRef<str>>(lines: &[S], sanitized_chars: &[String]) -> Self {
        let mut category: Option<String> = None;
        let mut vectors = Vec::new();

        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() {
                continue;
            }

            if let Some(name) = category_header(line) {
                category = Some(name.to_string());
                continue;
            }

            let vector = match &category {
                Some(name) => Vector::new(line, name),
                None => Vector::inferred(line, sanitized_chars),
            };
            vectors.push(vector);
        }

        Self::new(vectors)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vector> {
        self.vectors.iter()
    }

    pub fn as_slice(&self) -> &[Vector] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

fn category_header(line: &str) -> Option<&str> {
    let (head, rest) = line.split_once(':')?;
    if head.trim().eq_ignore_ascii_case("category") {
        let name = rest.trim();
        (!name.is_empty()).then_some(name)
    } else {
        None
    }
}

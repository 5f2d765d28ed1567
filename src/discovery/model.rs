//! Input model: the merged page graph and its flattened input points

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::page::{FormKey, Page, PageId};
use crate::http::{HttpMethod, Request};

/// Which value of a page's request shape is replaced
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputTarget {
    /// A bare query parameter of the page URL
    Query { key: String },
    /// A field of the page's `form`-th form
    FormField { form: usize, field: String },
}

/// The unit of injection: one field or query key of one page
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputPoint {
    pub page: PageId,
    pub target: InputTarget,
}

impl InputPoint {
    pub fn field_name(&self) -> &str {
        match &self.target {
            InputTarget::Query { key } => key,
            InputTarget::FormField { field, .. } => field,
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InputPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            InputTarget::Query { key } => write!(f, "{} query:{}", self.page, key),
            InputTarget::FormField { form, field } => {
                write!(f, "{} form#{}:{}", self.page, form, field)
            }
        }
    }
}

/// Single source of truth for what is testable
#[derive(Debug, Clone, Default)]
pub struct InputGraph {
    pages: Vec<Page>,
    index: HashMap<PageId, usize>,
    points: Vec<InputPoint>,
}

impl InputGraph {
    pub fn build(crawled: Vec<Page>, guessed: Vec<Page>) -> Self {
        Self::build_with(crawled, guessed, &[])
    }

    /// Merge both page sets by identity. Hidden fields named in
    /// `force_injectable` become input points even if they look structural.
    pub fn build_with(crawled: Vec<Page>, guessed: Vec<Page>, force_injectable: &[String]) -> Self {
        let mut merged: BTreeMap<PageId, Page> = BTreeMap::new();

        for page in crawled.into_iter().chain(guessed) {
            match merged.get_mut(&page.id) {
                Some(existing) => existing.merge(page),
                None => {
                    merged.insert(page.id.clone(), page);
                }
            }
        }

        let mut pages: Vec<Page> = merged.into_values().collect();

        if !force_injectable.is_empty() {
            for field in pages
                .iter_mut()
                .flat_map(|p| p.forms.iter_mut())
                .flat_map(|f| f.fields.iter_mut())
            {
                if force_injectable
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&field.name))
                {
                    field.injectable = true;
                }
            }
        }

        let mut points = Vec::new();
        for page in &pages {
            for key in page.query_inputs.keys() {
                points.push(InputPoint {
                    page: page.id.clone(),
                    target: InputTarget::Query { key: key.clone() },
                });
            }
            for (idx, form) in page.forms.iter().enumerate() {
                for field in form.fields.iter().filter(|f| f.injectable) {
                    points.push(InputPoint {
                        page: page.id.clone(),
                        target: InputTarget::FormField {
                            form: idx,
                            field: field.name.clone(),
                        },
                    });
                }
            }
        }

        let index = pages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();

        tracing::info!(pages = pages.len(), input_points = points.len(), "Input model built");

        Self {
            pages,
            index,
            points,
        }
    }

    /// Pages ordered by identity
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, id: &PageId) -> Option<&Page> {
        self.index.get(id).map(|&i| &self.pages[i])
    }

    pub fn points(&self) -> &[InputPoint] {
        &self.points
    }

    /// Pages that expose no input point at all
    pub fn pages_without_inputs(&self) -> Vec<&Page> {
        self.pages
            .iter()
            .filter(|p| !self.points.iter().any(|pt| pt.page == p.id))
            .collect()
    }

    /// Rebuild the owning page's request with only the targeted value
    /// replaced by `payload`. Every other value keeps its default.
    pub fn request_for(&self, point: &InputPoint, payload: &str) -> Option<Request> {
        let page = self.page(&point.page)?;

        match &point.target {
            InputTarget::Query { key } => {
                if !page.query_inputs.contains_key(key) {
                    return None;
                }
                let mut url = url::Url::parse(&page.url).ok()?;
                url.set_query(None);

                let fields = page
                    .query_inputs
                    .iter()
                    .map(|(k, v)| {
                        let value = if k == key { payload } else { v.as_str() };
                        (k.clone(), value.to_string())
                    })
                    .collect();

                Some(Request::get(url.as_str()).with_fields(fields))
            }
            InputTarget::FormField { form, field } => {
                let form = page.forms.get(*form)?;
                form.field(field)?;

                let values = form
                    .fields
                    .iter()
                    .map(|f| {
                        let value = if &f.name == field { payload } else { f.default.as_str() };
                        (f.name.clone(), value.to_string())
                    })
                    .collect();

                Some(form.submission(values))
            }
        }
    }

    /// Submissions that may change server state
    pub fn is_mutating(&self, point: &InputPoint) -> bool {
        self.method(point).map(|m| m.is_mutating()).unwrap_or(false)
    }

    pub fn method(&self, point: &InputPoint) -> Option<HttpMethod> {
        match &point.target {
            InputTarget::Query { .. } => Some(HttpMethod::Get),
            InputTarget::FormField { form, .. } => {
                self.page(&point.page)?.forms.get(*form).map(|f| f.method)
            }
        }
    }

    /// Key of the form an input point belongs to
    pub fn form_key(&self, point: &InputPoint) -> Option<FormKey> {
        match &point.target {
            InputTarget::Query { .. } => None,
            InputTarget::FormField { form, .. } => {
                self.page(&point.page)?.forms.get(*form).map(|f| f.key())
            }
        }
    }
}

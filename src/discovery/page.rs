//! Page, form and field entities

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

use crate::http::{HttpMethod, Request};

/// How a page was first found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Crawled,
    Guessed,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::Crawled => "crawled",
            DiscoveryMethod::Guessed => "guessed",
        }
    }
}

/// Page identity: normalized path plus the sorted set of query keys.
///
/// `/p?a=1&b=2` and `/p?b=9&a=0` are the same page, `/p?a=1` is not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub path: String,
    pub query_keys: Vec<String>,
}

impl PageId {
    pub fn from_url(url: &Url) -> Self {
        let mut query_keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        query_keys.sort();
        query_keys.dedup();

        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };

        Self { path, query_keys }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.query_keys.is_empty() {
            write!(f, "?{}", self.query_keys.join("&"))?;
        }
        Ok(())
    }
}

/// Form control kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Hidden,
    Password,
    Submit,
    Checkbox,
    Radio,
    Select,
    Textarea,
    File,
}

impl FieldKind {
    /// Map an `<input type=...>` value. Unknown types render as text inputs.
    pub fn from_input_type(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("hidden") => FieldKind::Hidden,
            Some("password") => FieldKind::Password,
            Some("submit") | Some("button") | Some("reset") | Some("image") => FieldKind::Submit,
            Some("checkbox") => FieldKind::Checkbox,
            Some("radio") => FieldKind::Radio,
            Some("file") => FieldKind::File,
            _ => FieldKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Hidden => "hidden",
            FieldKind::Password => "password",
            FieldKind::Submit => "submit",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Radio => "radio",
            FieldKind::Select => "select",
            FieldKind::Textarea => "textarea",
            FieldKind::File => "file",
        }
    }
}

/// Hidden field names that carry anti-forgery or framework state
const STRUCTURAL_TOKENS: &[&str] = &[
    "token",
    "csrf",
    "xsrf",
    "nonce",
    "__viewstate",
    "__eventvalidation",
    "__requestverificationtoken",
];

/// A named form control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    /// Value submitted when the field is left alone
    pub default: String,
    /// Whether the field is an input point
    pub injectable: bool,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind, default: &str) -> Self {
        let injectable = match kind {
            FieldKind::Submit => false,
            FieldKind::Hidden => !is_structural(name),
            _ => true,
        };

        Self {
            name: name.to_string(),
            kind,
            default: default.to_string(),
            injectable,
        }
    }
}

fn is_structural(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    STRUCTURAL_TOKENS.iter().any(|token| lower.contains(token))
}

/// Form dedup key: action, method and the set of field names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormKey {
    pub action: String,
    pub method: HttpMethod,
    pub names: BTreeSet<String>,
}

/// A parsed form. Never submitted during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    /// Absolute action URL
    pub action: String,
    pub method: HttpMethod,
    /// Fields in document order
    pub fields: Vec<Field>,
}

impl Form {
    pub fn key(&self) -> FormKey {
        FormKey {
            action: self.action.clone(),
            method: self.method,
            names: self.fields.iter().map(|f| f.name.clone()).collect(),
        }
    }

    /// Every field with its default value, in document order
    pub fn defaults(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Build the request a browser would send for `values`.
    ///
    /// A GET submission replaces the action's own query. File controls of a
    /// POST form are uploaded with their value as the file content.
    pub fn submission(&self, values: Vec<(String, String)>) -> Request {
        let action = match (self.method, Url::parse(&self.action)) {
            (HttpMethod::Get, Ok(mut url)) => {
                url.set_query(None);
                url.set_fragment(None);
                url.to_string()
            }
            _ => self.action.clone(),
        };

        let mut request = Request::new(self.method, &action);
        for (name, value) in values {
            let upload = self.method == HttpMethod::Post
                && self.field(&name).map(|f| f.kind) == Some(FieldKind::File);
            if upload {
                request.files.push((name, value));
            } else {
                request.fields.push((name, value));
            }
        }
        request
    }
}

/// A distinct reachable location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,

    /// URL of the first sighting, without fragment
    pub url: String,

    pub discovery: DiscoveryMethod,

    /// Methods the page is requested or submitted with
    pub methods: BTreeSet<HttpMethod>,

    pub forms: Vec<Form>,

    /// Query keys with the value seen on first sighting
    pub query_inputs: BTreeMap<String, String>,

    pub title: Option<String>,
}

impl Page {
    pub fn from_url(url: &Url, discovery: DiscoveryMethod) -> Self {
        let mut clean = url.clone();
        clean.set_fragment(None);

        let mut query_inputs = BTreeMap::new();
        for (k, v) in clean.query_pairs() {
            query_inputs.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }

        Self {
            id: PageId::from_url(&clean),
            url: clean.to_string(),
            discovery,
            methods: BTreeSet::from([HttpMethod::Get]),
            forms: Vec::new(),
            query_inputs,
            title: None,
        }
    }

    /// Attach a form unless an equivalent one is already present
    pub fn merge_form(&mut self, form: Form) -> bool {
        let key = form.key();
        if self.forms.iter().any(|f| f.key() == key) {
            return false;
        }
        self.methods.insert(form.method);
        self.forms.push(form);
        true
    }

    /// Union another sighting of the same page into this one.
    ///
    /// A page seen by the crawler stays `crawled` even when the guesser found
    /// it too.
    pub fn merge(&mut self, other: Page) {
        debug_assert_eq!(self.id, other.id);

        if other.discovery == DiscoveryMethod::Crawled {
            self.discovery = DiscoveryMethod::Crawled;
        }
        self.methods.extend(other.methods);
        for (k, v) in other.query_inputs {
            self.query_inputs.entry(k).or_insert(v);
        }
        if self.title.is_none() {
            self.title = other.title;
        }
        for form in other.forms {
            self.merge_form(form);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn form(action: &str, names: &[&str]) -> Form {
        Form {
            action: action.to_string(),
            method: HttpMethod::Get,
            fields: names.iter().map(|n| Field::new(n, FieldKind::Text, "")).collect(),
        }
    }

    #[test]
    fn test_page_identity_ignores_values_and_order() {
        let a = PageId::from_url(&url("http://t/p.php?b=1&a=2"));
        let b = PageId::from_url(&url("http://t/p.php?a=9&b=0#frag"));
        let c = PageId::from_url(&url("http://t/p.php?a=1"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "/p.php?a&b");
        assert_eq!(PageId::from_url(&url("http://t")).to_string(), "/");
    }

    #[test]
    fn test_field_injectability() {
        assert!(Field::new("id", FieldKind::Text, "").injectable);
        assert!(Field::new("step", FieldKind::Hidden, "1").injectable);
        assert!(!Field::new("user_token", FieldKind::Hidden, "abc").injectable);
        assert!(!Field::new("__VIEWSTATE", FieldKind::Hidden, "").injectable);
        assert!(!Field::new("Submit", FieldKind::Submit, "Submit").injectable);
        assert!(Field::new("security", FieldKind::Select, "low").injectable);
        assert!(Field::new("uploaded", FieldKind::File, "").injectable);
    }

    #[test]
    fn test_get_submission_replaces_action_query() {
        let search = Form {
            action: "http://t/p?x=1#".to_string(),
            method: HttpMethod::Get,
            fields: vec![Field::new("q", FieldKind::Text, "")],
        };
        let request = search.submission(search.defaults());

        assert_eq!(request.url, "http://t/p");
        assert_eq!(request.full_url(), "http://t/p?q=");
        assert_eq!(request.field("x"), None);
    }

    #[test]
    fn test_post_submission_uploads_file_controls() {
        let upload = Form {
            action: "http://t/upload/?step=2".to_string(),
            method: HttpMethod::Post,
            fields: vec![
                Field::new("MAX_FILE_SIZE", FieldKind::Hidden, "100000"),
                Field::new("uploaded", FieldKind::File, ""),
                Field::new("Upload", FieldKind::Submit, "Upload"),
            ],
        };
        let request = upload.submission(upload.defaults());

        assert_eq!(request.url, "http://t/upload/?step=2");
        assert_eq!(request.files, vec![("uploaded".to_string(), String::new())]);
        assert_eq!(request.fields.len(), 2);
        assert!(request.is_multipart());
    }

    #[test]
    fn test_input_type_mapping() {
        assert_eq!(FieldKind::from_input_type(None), FieldKind::Text);
        assert_eq!(FieldKind::from_input_type(Some("HIDDEN")), FieldKind::Hidden);
        assert_eq!(FieldKind::from_input_type(Some("email")), FieldKind::Text);
        assert_eq!(FieldKind::from_input_type(Some("reset")), FieldKind::Submit);
    }

    #[test]
    fn test_merge_form_dedupes_by_key() {
        let mut page = Page::from_url(&url("http://t/"), DiscoveryMethod::Crawled);
        assert!(page.merge_form(form("http://t/s", &["q", "go"])));
        assert!(!page.merge_form(form("http://t/s", &["go", "q"])));
        assert!(page.merge_form(form("http://t/s", &["q"])));
        assert_eq!(page.forms.len(), 2);
    }

    #[test]
    fn test_merge_prefers_crawled_and_unions() {
        let mut guessed = Page::from_url(&url("http://t/admin.php"), DiscoveryMethod::Guessed);
        guessed.merge_form(form("http://t/admin.php", &["user"]));

        let mut crawled = Page::from_url(&url("http://t/admin.php"), DiscoveryMethod::Crawled);
        crawled.merge_form(form("http://t/admin.php", &["user"]));
        crawled.merge_form(form("http://t/admin.php", &["pass"]));
        crawled.title = Some("Admin".into());

        guessed.merge(crawled);
        assert_eq!(guessed.discovery, DiscoveryMethod::Crawled);
        assert_eq!(guessed.forms.len(), 2);
        assert_eq!(guessed.title.as_deref(), Some("Admin"));
    }

    #[test]
    fn test_query_inputs_keep_first_value() {
        let page = Page::from_url(&url("http://t/a?lang=en&lang=fr&x=1"), DiscoveryMethod::Crawled);
        assert_eq!(page.query_inputs.get("lang").map(String::as_str), Some("en"));
        assert_eq!(page.query_inputs.len(), 2);
    }
}

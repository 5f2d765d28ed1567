//! Typed view over an HTML response
//!
//! Callers only ever see the title, the resolved links and the forms. The
//! DOM itself stays inside this module.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use super::page::{Field, FieldKind, Form};
use crate::http::HttpMethod;

/// What discovery needs from one document
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub title: Option<String>,
    /// Absolute http(s) links without fragments, in document order
    pub links: Vec<Url>,
    pub forms: Vec<Form>,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

impl ParsedDocument {
    /// Document with no links and no forms, used for bodies that are not HTML
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(html: &str, base: &Url) -> Self {
        let document = Html::parse_document(html);

        let title = document
            .select(&selector("title"))
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        Self {
            title,
            links: extract_links(&document, base),
            forms: extract_forms(&document, base),
        }
    }
}

fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let sources = [
        (selector("a[href], area[href]"), "href"),
        (selector("frame[src], iframe[src]"), "src"),
    ];

    for (sel, attr) in &sources {
        for element in document.select(sel) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            if let Some(url) = resolve_link(base, raw) {
                if seen.insert(url.to_string()) {
                    links.push(url);
                }
            }
        }
    }

    links
}

fn resolve_link(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn extract_forms(document: &Html, base: &Url) -> Vec<Form> {
    let controls = selector("input, textarea, select, button");

    document
        .select(&selector("form"))
        .map(|form| {
            let action = form_action(base, form.value().attr("action"));
            let method = HttpMethod::from_form_attr(form.value().attr("method"));

            let mut fields: Vec<Field> = Vec::new();
            for control in form.select(&controls) {
                let Some(field) = parse_control(control) else {
                    continue;
                };

                match fields.iter_mut().find(|f| f.name == field.name) {
                    // A radio group is one field; the checked option wins
                    Some(existing) if field.kind == FieldKind::Radio => {
                        if control.value().attr("checked").is_some() {
                            existing.default = field.default;
                        }
                    }
                    Some(_) => {}
                    None => fields.push(field),
                }
            }

            Form {
                action,
                method,
                fields,
            }
        })
        .collect()
}

/// Empty and `#` actions submit back to the page itself
fn form_action(base: &Url, action: Option<&str>) -> String {
    let mut url = match action.map(str::trim) {
        None | Some("") | Some("#") => base.clone(),
        Some(raw) => base.join(raw).unwrap_or_else(|_| base.clone()),
    };
    url.set_fragment(None);
    url.to_string()
}

fn parse_control(control: ElementRef<'_>) -> Option<Field> {
    let element = control.value();
    let name = element.attr("name").map(str::trim).filter(|n| !n.is_empty())?;

    let field = match element.name() {
        "textarea" => Field::new(name, FieldKind::Textarea, &control.text().collect::<String>()),
        "select" => Field::new(name, FieldKind::Select, &select_default(control)),
        "button" => Field::new(name, FieldKind::Submit, element.attr("value").unwrap_or("")),
        _ => {
            let kind = FieldKind::from_input_type(element.attr("type"));
            let default = match kind {
                FieldKind::Checkbox | FieldKind::Radio => element.attr("value").unwrap_or("on"),
                _ => element.attr("value").unwrap_or(""),
            };
            Field::new(name, kind, default)
        }
    };

    Some(field)
}

/// Selected option, else the first one. Options without a value submit their text.
fn select_default(select: ElementRef<'_>) -> String {
    let options: Vec<ElementRef<'_>> = select.select(&selector("option")).collect();

    let chosen = options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first());

    chosen
        .map(|o| match o.value().attr("value") {
            Some(v) => v.to_string(),
            None => o.text().collect::<String>().trim().to_string(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://target.test/vulnerabilities/sqli/").unwrap()
    }

    #[test]
    fn test_links_are_resolved_and_deduped() {
        let html = r##"
            <html><head><title> SQL Injection </title></head><body>
              <a href="../xss_r/">xss</a>
              <a href="/about.php?lang=en#top">about</a>
              <a href="/about.php?lang=en">again</a>
              <a href="#">self</a>
              <a href="javascript:void(0)">js</a>
              <a href="mailto:root@target.test">mail</a>
              <a href="http://www.dvwa.co.uk/">ext</a>
              <iframe src="frame.php"></iframe>
            </body></html>"##;

        let doc = ParsedDocument::parse(html, &base());
        let links: Vec<String> = doc.links.iter().map(|u| u.to_string()).collect();

        assert_eq!(doc.title.as_deref(), Some("SQL Injection"));
        assert_eq!(
            links,
            vec![
                "http://target.test/vulnerabilities/xss_r/",
                "http://target.test/about.php?lang=en",
                "http://www.dvwa.co.uk/",
                "http://target.test/vulnerabilities/sqli/frame.php",
            ]
        );
    }

    #[test]
    fn test_form_extraction() {
        let html = r##"
            <form action="#" method="GET">
              <input type="text" name="id">
              <input type="submit" name="Submit" value="Submit">
              <input type="hidden" name="user_token" value="abc123">
            </form>
            <form method="post" action="/guestbook.php">
              <input name="txtName" size="30" maxlength="10">
              <textarea name="mtxMessage">hello</textarea>
              <select name="level"><option value="1">one</option><option selected>two</option></select>
              <input type="checkbox" name="remember">
              <input type="radio" name="color" value="red">
              <input type="radio" name="color" value="blue" checked>
              <input type="text" placeholder="no name">
              <button name="btnSign" value="Sign">Sign</button>
            </form>"##;

        let doc = ParsedDocument::parse(html, &base());
        assert_eq!(doc.forms.len(), 2);

        let search = &doc.forms[0];
        assert_eq!(search.action, "http://target.test/vulnerabilities/sqli/");
        assert_eq!(search.method, HttpMethod::Get);
        let names: Vec<&str> = search.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "Submit", "user_token"]);
        assert_eq!(search.field("user_token").unwrap().default, "abc123");

        let guestbook = &doc.forms[1];
        assert_eq!(guestbook.action, "http://target.test/guestbook.php");
        assert_eq!(guestbook.method, HttpMethod::Post);
        assert_eq!(guestbook.field("txtName").unwrap().kind, FieldKind::Text);
        assert_eq!(guestbook.field("mtxMessage").unwrap().default, "hello");
        assert_eq!(guestbook.field("level").unwrap().default, "two");
        assert_eq!(guestbook.field("remember").unwrap().default, "on");
        assert_eq!(guestbook.field("color").unwrap().default, "blue");
        assert_eq!(guestbook.field("btnSign").unwrap().kind, FieldKind::Submit);
        assert_eq!(guestbook.fields.len(), 6);
    }

    #[test]
    fn test_garbage_input_yields_empty_document() {
        let doc = ParsedDocument::parse("\u{0}<<<>>>not html at all", &base());
        assert!(doc.links.is_empty());
        assert!(doc.forms.is_empty());
    }
}

//! HTML fragment tree.
//!
//! A fragment owns its own html text plus a list of child fragments, each
//! bound to an insertion offset computed once against the parent's text: right
//! after the opening tag of the first element carrying an attribute whose
//! value equals the child's key. Text is only assembled by [`Fragment::render`].

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref OPEN_TAG_RE: Regex = Regex::new(
        r#"<[A-Za-z][\w:\-]*(?:\s+[^\s=>/"']+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>"']+))?)*\s*/?>"#
    )
    .unwrap();
    static ref ATTR_RE: Regex =
        Regex::new(r#"[^\s=>/"']+\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#).unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub key: String,
    html: String,
    /// `(offset in html, child)`, in insertion order.
    children: Vec<(usize, Fragment)>,
}

impl Fragment {
    pub fn new(key: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            html: html.into(),
            children: Vec::new(),
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn children(&self) -> impl Iterator<Item = &Fragment> {
        self.children.iter().map(|(_, c)| c)
    }

    /// Attach `child` at its anchor. Returns false when no element carries the
    /// key; the child is then appended at the end.
    pub fn insert(&mut self, child: Fragment) -> bool {
        match anchor_offset(&self.html, &child.key) {
            Some(offset) => {
                self.children.push((offset, child));
                true
            }
            None => {
                tracing::warn!(
                    "[lx:renderer] No element keyed '{}' in '{}', appending",
                    child.key,
                    self.key
                );
                self.children.push((self.html.len(), child));
                false
            }
        }
    }

    pub fn render(&self) -> String {
        let mut points: Vec<(usize, usize)> = self
            .children
            .iter()
            .enumerate()
            .map(|(i, (offset, _))| (*offset, i))
            .collect();
        points.sort();

        let mut out = String::with_capacity(self.html.len());
        let mut last = 0;
        for (offset, i) in points {
            out.push_str(&self.html[last..offset]);
            out.push_str(&self.children[i].1.render());
            last = offset;
        }
        out.push_str(&self.html[last..]);
        out
    }
}

/// Offset just past the opening tag of the first element with an attribute
/// value equal to `key`.
pub fn anchor_offset(html: &str, key: &str) -> Option<usize> {
    OPEN_TAG_RE.find_iter(html).find_map(|tag| {
        let hit = ATTR_RE.captures_iter(tag.as_str()).any(|caps| {
            let value = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str());
            value == Some(key)
        });
        hit.then(|| tag.end())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_spliced_after_keyed_element() {
        let mut root = Fragment::new("root", r#"<div class="a"><section data-lx="x1"></section><p>t</p></div>"#);
        assert!(root.insert(Fragment::new("x1", "<b>child</b>")));
        assert_eq!(
            root.render(),
            r#"<div class="a"><section data-lx="x1"><b>child</b></section><p>t</p></div>"#
        );
    }

    #[test]
    fn test_first_keyed_element_wins() {
        let mut root = Fragment::new("r", "<i id='k'></i><u id='k'></u>");
        root.insert(Fragment::new("k", "C"));
        assert_eq!(root.render(), "<i id='k'>C</i><u id='k'></u>");
    }

    #[test]
    fn test_nested_fragments_render_recursively() {
        let mut mid = Fragment::new("m", r#"<span data-key="leaf"></span>"#);
        mid.insert(Fragment::new("leaf", "L"));
        let mut root = Fragment::new("r", r#"<div data-key="m"></div>"#);
        root.insert(mid);
        assert_eq!(
            root.render(),
            r#"<div data-key="m"><span data-key="leaf">L</span></div>"#
        );
    }

    #[test]
    fn test_missing_anchor_appends() {
        let mut root = Fragment::new("r", "<div></div>");
        assert!(!root.insert(Fragment::new("nope", "X")));
        assert_eq!(root.render(), "<div></div>X");
    }

    #[test]
    fn test_key_must_match_whole_value() {
        assert_eq!(anchor_offset(r#"<a href="x10"></a>"#, "x1"), None);
        assert_eq!(anchor_offset(r#"<a href=x1>"#, "x1"), Some(11));
    }
}

//! Tolerant markup reader.
//!
//! Builds a small element tree from the calendar page. The page is
//! hand-written table markup with unclosed `<td>`/`<tr>` tags, stray end
//! tags and legacy attributes, so the reader never fails: unknown end tags
//! are ignored, missing end tags are closed implicitly, and `<script>` /
//! `<style>` bodies are skipped.

/// A node in the parsed tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with lowercase name and attribute keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

impl Element {
    fn new(name: &str, attrs: Vec<(String, String)>) -> Self {
        Self {
            name: name.to_string(),
            attrs,
            children: Vec::new(),
        }
    }

    /// Attribute value by (lowercase) name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All descendant elements named `name`, in document order.
    pub fn find_all(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect(&|el: &Element| el.name == name, &mut out);
        out
    }

    /// First descendant element matching `pred`, in document order.
    pub fn find_first<F>(&self, pred: F) -> Option<&Element>
    where
        F: Fn(&Element) -> bool,
    {
        self.find_first_dyn(&pred)
    }

    fn find_first_dyn(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        for child in &self.children {
            if let Node::Element(el) = child {
                if pred(el) {
                    return Some(el);
                }
                if let Some(found) = el.find_first_dyn(pred) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Direct element children named `name`.
    pub fn children_named(&self, name: &str) -> impl Iterator<Item = &Element> + '_ {
        let name = name.to_string();
        self.children.iter().filter_map(move |child| match child {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }

    fn collect<'a, F>(&'a self, pred: &F, out: &mut Vec<&'a Element>)
    where
        F: Fn(&Element) -> bool,
    {
        for child in &self.children {
            if let Node::Element(el) = child {
                if pred(el) {
                    out.push(el);
                }
                el.collect(pred, out);
            }
        }
    }

    /// Concatenated descendant text with every text run trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(text.trim()),
                Node::Element(el) => el.push_text(out),
            }
        }
    }
}

/// Parse `markup` into a synthetic `#document` root element.
pub fn parse_document(markup: &str) -> Element {
    let mut builder = TreeBuilder::new();
    let bytes = markup.as_bytes();
    let mut pos = 0;
    let mut text_start = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }
        let rest = &markup[pos..];

        if rest.starts_with("<!--") {
            builder.text(&markup[text_start..pos]);
            pos = rest.find("-->").map(|i| pos + i + 3).unwrap_or(bytes.len());
            text_start = pos;
            continue;
        }

        let next = bytes.get(pos + 1).copied().unwrap_or(b' ');
        let is_tag = next.is_ascii_alphabetic() || next == b'/' || next == b'!' || next == b'?';
        if !is_tag {
            pos += 1;
            continue;
        }

        builder.text(&markup[text_start..pos]);
        let end = find_tag_end(markup, pos);
        let inner_end = if end > pos + 1 && bytes[end - 1] == b'>' { end - 1 } else { end };
        let inner = &markup[pos + 1..inner_end];
        pos = end;
        text_start = pos;

        if next == b'!' || next == b'?' {
            continue;
        }
        if let Some(name) = inner.strip_prefix('/') {
            builder.close(&tag_name(name));
            continue;
        }

        let (name, attrs, self_closing) = parse_start_tag(inner);
        if name.is_empty() {
            continue;
        }
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
            let close = format!("</{}", name);
            let lowered = markup[pos..].to_ascii_lowercase();
            let body_end = lowered.find(&close).map(|i| pos + i).unwrap_or(bytes.len());
            pos = find_tag_end(markup, body_end);
            text_start = pos;
            continue;
        }
        builder.open(&name, attrs, self_closing);
    }
    builder.text(&markup[text_start..]);
    builder.finish()
}

/// Index just past the `>` that ends the tag starting at `start`, honouring
/// quoted attribute values.
fn find_tag_end(markup: &str, start: usize) -> usize {
    let bytes = markup.as_bytes();
    let mut quote: Option<u8> = None;
    let mut pos = start + 1;
    while pos < bytes.len() {
        let b = bytes[pos];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return pos + 1,
            None => {}
        }
        pos += 1;
    }
    bytes.len()
}

fn tag_name(raw: &str) -> String {
    raw.trim()
        .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn parse_start_tag(inner: &str) -> (String, Vec<(String, String)>, bool) {
    let trimmed = inner.trim_end();
    let self_closing = trimmed.ends_with('/');
    let body = trimmed.trim_end_matches('/');
    let name = tag_name(body);
    let attrs = parse_attributes(&body[name.len().min(body.len())..]);
    (name, attrs, self_closing)
}

fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = raw.chars().collect();
    let mut attrs = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == '/') {
            i += 1;
        }
        let key_start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '=' && chars[i] != '/' {
            i += 1;
        }
        if key_start == i {
            break;
        }
        let key: String = chars[key_start..i].iter().collect::<String>().to_ascii_lowercase();

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < chars.len() && chars[i] == '=' {
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') {
                let quote = chars[i];
                i += 1;
                let value_start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                value = chars[value_start..i].iter().collect();
                i += 1;
            } else {
                let value_start = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                value = chars[value_start..i].iter().collect();
            }
        }
        attrs.push((key, decode_entities(&value)));
    }
    attrs
}

/// Decode the handful of character references the page actually uses.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|semi| *semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            decode_entity(entity).map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        "times" => Some('×'),
        _ => {
            let numeric = entity.strip_prefix('#')?;
            let hex = numeric.strip_prefix('x').or_else(|| numeric.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

struct TreeBuilder {
    stack: Vec<Element>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![Element::new("#document", Vec::new())],
        }
    }

    fn text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let decoded = decode_entities(raw);
        if let Some(top) = self.stack.last_mut() {
            top.children.push(Node::Text(decoded));
        }
    }

    fn open(&mut self, name: &str, attrs: Vec<(String, String)>, self_closing: bool) {
        self.close_implied_by(name);
        let element = Element::new(name, attrs);
        if self_closing || VOID_ELEMENTS.contains(&name) {
            if let Some(top) = self.stack.last_mut() {
                top.children.push(Node::Element(element));
            }
        } else {
            self.stack.push(element);
        }
    }

    /// A new cell closes an open cell of the same row; a new row closes an
    /// open row of the same table.
    fn close_implied_by(&mut self, name: &str) {
        let (targets, boundary): (&[&str], &[&str]) = match name {
            "td" | "th" => (&["td", "th"], &["tr", "table"]),
            "tr" => (&["tr"], &["table"]),
            _ => return,
        };
        let open_index = self
            .stack
            .iter()
            .rposition(|el| targets.contains(&el.name.as_str()) || boundary.contains(&el.name.as_str()));
        if let Some(index) = open_index {
            if targets.contains(&self.stack[index].name.as_str()) {
                self.pop_to(index);
            }
        }
    }

    fn close(&mut self, name: &str) {
        if let Some(index) = self.stack.iter().rposition(|el| el.name == name) {
            if index > 0 {
                self.pop_to(index);
            }
        }
    }

    /// Pop every element at `index` and above, attaching each to its parent.
    fn pop_to(&mut self, index: usize) {
        while self.stack.len() > index {
            let Some(element) = self.stack.pop() else { break };
            match self.stack.last_mut() {
                Some(parent) => parent.children.push(Node::Element(element)),
                None => {
                    self.stack.push(element);
                    break;
                }
            }
        }
    }

    fn finish(mut self) -> Element {
        self.pop_to(1);
        self.stack.pop().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let doc = parse_document(r#"<table BORDER="2"><tr><td valign=top>1</td></tr></table>"#);
        let table = doc.find_first(|el| el.name == "table").unwrap();
        assert_eq!(table.attr("border"), Some("2"));
        let td = &doc.find_all("td")[0];
        assert_eq!(td.attr("valign"), Some("top"));
        assert_eq!(td.text(), "1");
    }

    #[test]
    fn unclosed_cells_and_rows_are_closed_implicitly() {
        let doc = parse_document("<table><tr><td>a<td>b<tr><td>c</table>");
        let rows = doc.find_all("tr");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].children_named("td").count(), 2);
        assert_eq!(rows[1].children_named("td").count(), 1);
    }

    #[test]
    fn nested_table_cells_do_not_close_outer_cell() {
        let doc = parse_document("<table><tr><td>x<table><tr><td>y</td></tr></table>z</td></tr></table>");
        let outer_row = doc.find_first(|el| el.name == "tr").unwrap();
        let outer_cell = outer_row.children_named("td").next().unwrap();
        assert_eq!(outer_cell.text(), "xyz");
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let doc = parse_document("<div></span>text</div>");
        assert_eq!(doc.find_all("div")[0].text(), "text");
    }

    #[test]
    fn comments_scripts_and_doctype_are_skipped() {
        let doc = parse_document(
            "<!DOCTYPE html><!-- <td>no</td> --><script>var a = '<td>';</script><p>ok</p>",
        );
        assert!(doc.find_all("td").is_empty());
        assert_eq!(doc.text(), "ok");
    }

    #[test]
    fn text_runs_are_trimmed_and_concatenated() {
        let doc = parse_document("<font>  ♀ <b> ×2 </b>\n</font>");
        assert_eq!(doc.find_all("font")[0].text(), "♀×2");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(decode_entities("a&amp;b&nbsp;&#65;&#x42;&bogus;"), "a&b\u{a0}AB&bogus;");
    }

    #[test]
    fn void_elements_do_not_swallow_siblings() {
        let doc = parse_document("<center>3<br>Fri</center>");
        assert_eq!(doc.find_all("center")[0].text(), "3Fri");
    }
}

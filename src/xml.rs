//! Owned XML element tree for package parts.
//!
//! Package parts are small enough to hold in memory, and the edits the
//! pipeline makes (removing a hyperlink, swapping a run, repointing a
//! relationship) are structural. This module turns `quick-xml` events into
//! a mutable tree and writes the tree back out.
//!
//! Element and attribute names are kept as qualified strings (`w:hyperlink`,
//! `r:id`) so namespace prefixes round-trip untouched. Elements are addressed
//! by *paths* (child indices from the root); a path is only valid until the
//! next structural edit of the tree.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::XmlError;

/// Child-index path from the root element.
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    /// Comment, processing instruction, or doctype, already serialized.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    /// Declaration content without the `<?` `?>` delimiters.
    pub declaration: Option<String>,
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

/// Run content that is visible without any `w:t`.
const VISIBLE_NON_TEXT: [&str; 5] = ["drawing", "pict", "object", "sym", "tab"];

/// Local part of a qualified name: `w:hyperlink` -> `hyperlink`.
pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local
    }

    /// Attribute by exact qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute by local name, ignoring the prefix.
    pub fn attr_local(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| local_name(k) == local)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Remove every attribute with this local name; returns the first value.
    pub fn remove_attr_local(&mut self, local: &str) -> Option<String> {
        let mut removed = None;
        self.attributes.retain(|(k, v)| {
            if local_name(k) == local {
                if removed.is_none() {
                    removed = Some(v.clone());
                }
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn find_child(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(local))
    }

    /// Concatenated character data of this element and its descendants.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Concatenated text of every descendant element with this local name
    /// (e.g. all `w:t` under a hyperlink).
    pub fn descendant_text(&self, local: &str) -> String {
        let mut out = String::new();
        self.visit(&mut |el| {
            if el.is(local) {
                out.push_str(&el.inner_text());
            }
        });
        out
    }

    /// Whether a descendant renders without text (drawing, picture,
    /// embedded object, symbol or tab).
    pub fn has_visible_content(&self) -> bool {
        self.child_elements()
            .any(|c| VISIBLE_NON_TEXT.contains(&c.local_name()) || c.has_visible_content())
    }

    /// Pre-order visit of this element and all descendants.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Element)) {
        f(self);
        for child in self.child_elements() {
            child.visit(f);
        }
    }

    /// Paths (relative to `self`) of every descendant matching `pred`,
    /// in document order. `self` itself is never included.
    pub fn find_paths(&self, pred: &dyn Fn(&Element) -> bool) -> Vec<NodePath> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        find_paths_inner(self, pred, &mut path, &mut out);
        out
    }

    pub fn get(&self, path: &[usize]) -> Option<&Element> {
        let mut cur = self;
        for &idx in path {
            cur = match cur.children.get(idx)? {
                Node::Element(e) => e,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn get_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut cur = self;
        for &idx in path {
            cur = match cur.children.get_mut(idx)? {
                Node::Element(e) => e,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Detach the node at `path`.
    pub fn remove(&mut self, path: &[usize]) -> Option<Node> {
        let (last, parent_path) = path.split_last()?;
        let parent = self.get_mut(parent_path)?;
        if *last < parent.children.len() {
            Some(parent.children.remove(*last))
        } else {
            None
        }
    }

    /// Replace the element at `path`, returning the previous one.
    pub fn replace(&mut self, path: &[usize], element: Element) -> Option<Element> {
        let target = self.get_mut(path)?;
        Some(std::mem::replace(target, element))
    }

    /// Remove every descendant element for which `pred` returns true.
    /// Returns the number of elements removed.
    pub fn remove_where(&mut self, pred: &dyn Fn(&Element) -> bool) -> usize {
        let mut removed = 0;
        self.children.retain(|node| match node {
            Node::Element(e) if pred(e) => {
                removed += 1;
                false
            }
            _ => true,
        });
        for child in self.children.iter_mut() {
            if let Node::Element(e) = child {
                removed += e.remove_where(pred);
            }
        }
        removed
    }
}

fn collect_text(el: &Element, out: &mut String) {
    for child in &el.children {
        match child {
            Node::Text(t) | Node::CData(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
            Node::Raw(_) => {}
        }
    }
}

fn find_paths_inner(
    el: &Element,
    pred: &dyn Fn(&Element) -> bool,
    path: &mut NodePath,
    out: &mut Vec<NodePath>,
) {
    for (idx, child) in el.children.iter().enumerate() {
        if let Node::Element(e) = child {
            path.push(idx);
            if pred(e) {
                out.push(path.clone());
            }
            find_paths_inner(e, pred, path, out);
            path.pop();
        }
    }
}

impl XmlDocument {
    pub fn new(root: Element) -> Self {
        Self {
            declaration: Some(r#"xml version="1.0" encoding="UTF-8" standalone="yes""#.to_string()),
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut declaration = None;
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                XmlError::Parse(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            match event {
                Event::Decl(d) => {
                    declaration = Some(String::from_utf8_lossy(&d).into_owned());
                }
                Event::Start(e) => stack.push(element_from_start(&e)?),
                Event::Empty(e) => {
                    let el = element_from_start(&e)?;
                    attach(&mut stack, &mut root, Node::Element(el))?;
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| XmlError::Parse("unexpected end tag".to_string()))?;
                    attach(&mut stack, &mut root, Node::Element(el))?;
                }
                Event::Text(t) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = t.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                        parent.children.push(Node::Text(text.into_owned()));
                    }
                }
                Event::CData(c) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(Node::CData(String::from_utf8_lossy(&c).into_owned()));
                    }
                }
                Event::Comment(c) => {
                    let raw = Node::Raw(format!("<!--{}-->", String::from_utf8_lossy(&c)));
                    push_misc(&mut stack, &root, &mut prolog, &mut epilog, raw);
                }
                Event::PI(p) => {
                    let raw = Node::Raw(format!("<?{}?>", String::from_utf8_lossy(&p)));
                    push_misc(&mut stack, &root, &mut prolog, &mut epilog, raw);
                }
                Event::DocType(d) => {
                    let raw = Node::Raw(format!("<!DOCTYPE {}>", String::from_utf8_lossy(&d)));
                    push_misc(&mut stack, &root, &mut prolog, &mut epilog, raw);
                }
                Event::Eof => break,
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Parse(format!("unclosed element <{}>", open.name)));
        }
        Ok(Self {
            declaration,
            prolog,
            root: root.ok_or(XmlError::MissingRoot)?,
            epilog,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = Writer::new(Vec::new());
        if let Some(decl) = &self.declaration {
            writer
                .get_mut()
                .extend_from_slice(format!("<?{}?>\r\n", decl).as_bytes());
        }
        for node in &self.prolog {
            write_node(&mut writer, node)?;
        }
        write_element(&mut writer, &self.root)?;
        for node in &self.epilog {
            write_node(&mut writer, node)?;
        }
        Ok(writer.into_inner())
    }
}

fn element_from_start(e: &BytesStart) -> Result<Element, XmlError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlError::Parse(format!("<{}>: {}", name, err)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Parse(format!("<{}>: {}", name, err)))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, node: Node) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    match node {
        Node::Element(el) if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        Node::Element(el) => Err(XmlError::Parse(format!(
            "second root element <{}>",
            el.name
        ))),
        _ => Ok(()),
    }
}

fn push_misc(
    stack: &mut [Element],
    root: &Option<Element>,
    prolog: &mut Vec<Node>,
    epilog: &mut Vec<Node>,
    node: Node,
) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        prolog.push(node);
    } else {
        epilog.push(node);
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<(), XmlError> {
    match node {
        Node::Element(el) => write_element(writer, el),
        Node::Text(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| XmlError::Write(e.to_string())),
        Node::CData(text) => writer
            .write_event(Event::CData(BytesCData::new(text.as_str())))
            .map_err(|e| XmlError::Write(e.to_string())),
        Node::Raw(raw) => {
            writer.get_mut().extend_from_slice(raw.as_bytes());
            Ok(())
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &Element) -> Result<(), XmlError> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if el.children.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| XmlError::Write(e.to_string()));
    }
    writer
        .write_event(Event::Start(start))
        .map_err(|e| XmlError::Write(e.to_string()))?;
    for child in &el.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(el.name.as_str())))
        .map_err(|e| XmlError::Write(e.to_string()))
}

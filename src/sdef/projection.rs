//! Overview, full and targeted-query views of a parsed dictionary.

use serde::Serialize;

use super::Element;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Overview,
    Full,
    /// `type:name` tokens, structured matches.
    Query(Vec<String>),
    /// `type:name` tokens, matches as XML fragments.
    Raw(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DictionaryView {
    Document(InterfaceDocument),
    Matches(Vec<QueryMatch>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceDocument {
    pub application_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub suites: Vec<Suite>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suite {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub classes: Vec<ClassEntry>,
    pub commands: Vec<CommandEntry>,
    pub enumerations: Vec<EnumerationEntry>,
    pub events: Vec<CommandEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClassEntry {
    Summary(ClassSummary),
    Detail(ClassDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandEntry {
    Summary(CommandSummary),
    Detail(CommandDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnumerationEntry {
    Summary(EnumerationSummary),
    Detail(EnumerationDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,
    pub property_count: usize,
    pub element_count: usize,
    pub responds_to_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerationSummary {
    pub name: String,
    pub enumerator_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    /// Set for `class-extension` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    pub properties: Vec<PropertyDetail>,
    pub elements: Vec<ElementDetail>,
    pub responds_to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementDetail {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_parameter: Option<ParameterDetail>,
    pub parameters: Vec<ParameterDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultDetail {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerationDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub enumerators: Vec<EnumeratorDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumeratorDetail {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Any element the typed views don't model: tag, attributes and children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericDetail {
    pub tag: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GenericDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchDetail {
    Class(ClassDetail),
    Command(CommandDetail),
    Event(CommandDetail),
    Enumeration(EnumerationDetail),
    Other(GenericDetail),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedElement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    pub detail: MatchDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryMatch {
    Found { query: String, matches: Vec<MatchedElement> },
    NotFound { query: String, reason: String },
}

fn owned(v: Option<&str>) -> Option<String> {
    v.map(str::to_string)
}

/// `type` attribute, or nested `<type>` children (`list="yes"` → "list of …").
fn type_of(el: &Element) -> Option<String> {
    if let Some(t) = el.attr("type") {
        return Some(t.to_string());
    }
    let types: Vec<String> = el
        .children_named("type")
        .filter_map(|t| {
            let name = t.attr("type")?;
            Some(if t.attr("list") == Some("yes") {
                format!("list of {}", name)
            } else {
                name.to_string()
            })
        })
        .collect();
    (!types.is_empty()).then(|| types.join(" | "))
}

fn is_class(el: &Element) -> bool {
    el.tag == "class" || el.tag == "class-extension"
}

fn class_name(el: &Element) -> String {
    el.name()
        .or_else(|| el.attr("extends"))
        .unwrap_or_default()
        .to_string()
}

fn class_summary(el: &Element) -> ClassSummary {
    ClassSummary {
        name: class_name(el),
        description: owned(el.attr("description")),
        inherits: owned(el.attr("inherits")),
        property_count: el.children_named("property").count(),
        element_count: el.children_named("element").count(),
        responds_to_count: el.children_named("responds-to").count(),
    }
}

fn class_detail(el: &Element) -> ClassDetail {
    ClassDetail {
        name: class_name(el),
        code: owned(el.attr("code")),
        description: owned(el.attr("description")),
        inherits: owned(el.attr("inherits")),
        plural: owned(el.attr("plural")),
        extends: owned(el.attr("extends")),
        properties: el
            .children_named("property")
            .map(|p| PropertyDetail {
                name: p.name().unwrap_or_default().to_string(),
                code: owned(p.attr("code")),
                value_type: type_of(p),
                access: owned(p.attr("access")),
                description: owned(p.attr("description")),
            })
            .collect(),
        elements: el
            .children_named("element")
            .map(|e| ElementDetail {
                element_type: e.attr("type").unwrap_or_default().to_string(),
                access: owned(e.attr("access")),
            })
            .collect(),
        responds_to: el
            .children_named("responds-to")
            .filter_map(|r| r.attr("command").or_else(|| r.name()).map(str::to_string))
            .collect(),
    }
}

fn parameter(el: &Element) -> ParameterDetail {
    ParameterDetail {
        name: owned(el.name()),
        code: owned(el.attr("code")),
        value_type: type_of(el),
        optional: el.attr("optional") == Some("yes"),
        description: owned(el.attr("description")),
    }
}

fn command_summary(el: &Element) -> CommandSummary {
    CommandSummary {
        name: el.name().unwrap_or_default().to_string(),
        description: owned(el.attr("description")),
        parameter_count: el.children_named("parameter").count()
            + usize::from(el.child("direct-parameter").is_some()),
    }
}

fn command_detail(el: &Element) -> CommandDetail {
    CommandDetail {
        name: el.name().unwrap_or_default().to_string(),
        code: owned(el.attr("code")),
        description: owned(el.attr("description")),
        direct_parameter: el.child("direct-parameter").map(parameter),
        parameters: el.children_named("parameter").map(parameter).collect(),
        result: el.child("result").map(|r| ResultDetail {
            value_type: type_of(r),
            description: owned(r.attr("description")),
        }),
    }
}

fn enumeration_detail(el: &Element) -> EnumerationDetail {
    EnumerationDetail {
        name: el.name().unwrap_or_default().to_string(),
        code: owned(el.attr("code")),
        enumerators: el
            .children_named("enumerator")
            .map(|e| EnumeratorDetail {
                name: e.name().unwrap_or_default().to_string(),
                code: owned(e.attr("code")),
                description: owned(e.attr("description")),
            })
            .collect(),
    }
}

fn generic_detail(el: &Element) -> GenericDetail {
    GenericDetail {
        tag: el.tag.clone(),
        attributes: el
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
        children: el.children.iter().map(generic_detail).collect(),
    }
}

fn match_detail(el: &Element) -> MatchDetail {
    match el.tag.as_str() {
        "class" | "class-extension" => MatchDetail::Class(class_detail(el)),
        "command" => MatchDetail::Command(command_detail(el)),
        "event" => MatchDetail::Event(command_detail(el)),
        "enumeration" => MatchDetail::Enumeration(enumeration_detail(el)),
        _ => MatchDetail::Other(generic_detail(el)),
    }
}

/// Suites at any depth: sdef files sometimes wrap them in `xi:include` targets.
fn suites(root: &Element) -> Vec<&Element> {
    if root.tag == "suite" {
        return vec![root];
    }
    let mut out = Vec::new();
    for child in &root.children {
        out.extend(suites(child));
    }
    out
}

fn suite_with<C, M, E>(el: &Element, class: C, command: M, enumeration: E) -> Suite
where
    C: Fn(&Element) -> ClassEntry,
    M: Fn(&Element) -> CommandEntry,
    E: Fn(&Element) -> EnumerationEntry,
{
    Suite {
        name: el.name().unwrap_or_default().to_string(),
        code: owned(el.attr("code")),
        description: owned(el.attr("description")),
        classes: el.children.iter().filter(|c| is_class(c)).map(&class).collect(),
        commands: el.children_named("command").map(&command).collect(),
        enumerations: el.children_named("enumeration").map(&enumeration).collect(),
        events: el.children_named("event").map(&command).collect(),
    }
}

fn document(root: &Element, application: &str, suites: Vec<Suite>) -> InterfaceDocument {
    InterfaceDocument {
        application_name: application.to_string(),
        title: owned(root.attr("title")),
        suites,
    }
}

/// Cheap discovery view: names, descriptions and counts only.
pub fn overview(root: &Element, application: &str) -> InterfaceDocument {
    let suites = suites(root)
        .into_iter()
        .map(|s| {
            suite_with(
                s,
                |c| ClassEntry::Summary(class_summary(c)),
                |c| CommandEntry::Summary(command_summary(c)),
                |e| {
                    EnumerationEntry::Summary(EnumerationSummary {
                        name: e.name().unwrap_or_default().to_string(),
                        enumerator_count: e.children_named("enumerator").count(),
                    })
                },
            )
        })
        .collect();
    document(root, application, suites)
}

pub fn full(root: &Element, application: &str) -> InterfaceDocument {
    let suites = suites(root)
        .into_iter()
        .map(|s| {
            suite_with(
                s,
                |c| ClassEntry::Detail(class_detail(c)),
                |c| CommandEntry::Detail(command_detail(c)),
                |e| EnumerationEntry::Detail(enumeration_detail(e)),
            )
        })
        .collect();
    document(root, application, suites)
}

fn parse_token(token: &str) -> Option<(&str, &str)> {
    let (kind, name) = token.split_once(':')?;
    let (kind, name) = (kind.trim(), name.trim());
    (!kind.is_empty() && !name.is_empty()).then_some((kind, name))
}

fn find_matches<'a>(
    el: &'a Element,
    suite: Option<&'a str>,
    kind: &str,
    name: &str,
    out: &mut Vec<(Option<&'a str>, &'a Element)>,
) {
    let suite = if el.tag == "suite" { el.name().or(suite) } else { suite };
    let matches_name = el.name() == Some(name)
        || (el.tag == "class-extension" && el.attr("extends") == Some(name));
    if el.tag == kind && matches_name {
        out.push((suite, el));
    }
    for child in &el.children {
        find_matches(child, suite, kind, name, out);
    }
}

fn lookup<'a>(root: &'a Element, token: &str) -> Result<Vec<(Option<&'a str>, &'a Element)>, String> {
    let (kind, name) =
        parse_token(token).ok_or_else(|| "expected a type:name token".to_string())?;
    let mut hits = Vec::new();
    find_matches(root, None, kind, name, &mut hits);
    if hits.is_empty() {
        return Err(format!("no {} named \"{}\"", kind, name));
    }
    Ok(hits)
}

/// Full detail for each `type:name` token; misses are reported, not dropped.
pub fn query(root: &Element, tokens: &[String]) -> Vec<QueryMatch> {
    tokens
        .iter()
        .map(|token| match lookup(root, token) {
            Ok(hits) => QueryMatch::Found {
                query: token.clone(),
                matches: hits
                    .into_iter()
                    .map(|(suite, el)| MatchedElement {
                        suite: owned(suite),
                        detail: match_detail(el),
                    })
                    .collect(),
            },
            Err(reason) => QueryMatch::NotFound { query: token.clone(), reason },
        })
        .collect()
}

fn comment_safe(text: &str) -> String {
    text.replace("--", "- -")
}

/// Matches as XML fragments, each preceded by a comment naming its query.
pub fn query_raw(root: &Element, tokens: &[String]) -> String {
    let mut out = String::new();
    for token in tokens {
        match lookup(root, token) {
            Ok(hits) => {
                out.push_str(&format!("<!-- query: {} -->\n", comment_safe(token)));
                for (_, el) in hits {
                    out.push_str(&el.to_xml());
                }
            }
            Err(reason) => {
                out.push_str(&format!(
                    "<!-- not found: {} ({}) -->\n",
                    comment_safe(token),
                    comment_safe(&reason)
                ));
            }
        }
    }
    out
}

pub fn project(root: &Element, application: &str, projection: &Projection) -> DictionaryView {
    match projection {
        Projection::Overview => DictionaryView::Document(overview(root, application)),
        Projection::Full => DictionaryView::Document(full(root, application)),
        Projection::Query(tokens) => DictionaryView::Matches(query(root, tokens)),
        Projection::Raw(tokens) => DictionaryView::Raw(query_raw(root, tokens)),
    }
}

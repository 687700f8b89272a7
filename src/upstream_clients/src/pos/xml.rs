//! XML parsing and building for the older POS endpoints.
//!
//! Parsing rule: record fields are taken from *direct* children only, and
//! only from children that carry no element children of their own. The
//! employee DTO nests same-named tags (`<employee>` inside `<employee>`) as
//! boolean flags — recursive descent would multiply records.

use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use crate::errors::UpstreamError;

fn leaf_text(node: &Node) -> Value {
    match node.text().map(str::trim) {
        Some(t) if !t.is_empty() => Value::String(t.to_string()),
        _ => Value::Null,
    }
}

fn fields_from_direct_children(record: &Node) -> Value {
    let mut map = Map::new();
    for child in record.children().filter(|n| n.is_element()) {
        if child.children().any(|n| n.is_element()) {
            // Nested structure (or a same-named flag) — not a scalar field.
            continue;
        }
        map.insert(child.tag_name().name().to_string(), leaf_text(&child));
    }
    Value::Object(map)
}

/// Records that are direct children of the document root, e.g.
/// `<employees><employee>…</employee></employees>`.
pub(crate) fn parse_child_records(
    xml: &str,
    tag: &str,
    url: &str,
) -> Result<Vec<Value>, UpstreamError> {
    let doc = Document::parse(xml).map_err(|e| UpstreamError::decode(url, e.to_string()))?;
    let records = doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == tag)
        .map(|n| fields_from_direct_children(&n))
        .collect();
    Ok(records)
}

/// Records matched by tag name anywhere in the tree. The corporate endpoints
/// wrap their DTOs at varying depth; field extraction still only looks at
/// direct children.
pub(crate) fn parse_named_records(
    xml: &str,
    tags: &[&str],
    url: &str,
) -> Result<Vec<Value>, UpstreamError> {
    let doc = Document::parse(xml).map_err(|e| UpstreamError::decode(url, e.to_string()))?;
    let records = doc
        .descendants()
        .filter(|n| n.is_element() && tags.contains(&n.tag_name().name()))
        .map(|n| fields_from_direct_children(&n))
        .collect();
    Ok(records)
}

/// Departments / stores / groups: `corporateItemDto` plus `groupDto` records.
pub(crate) fn parse_corporate_items(xml: &str, url: &str) -> Result<Vec<Value>, UpstreamError> {
    parse_named_records(xml, &["corporateItemDto", "groupDto"], url)
}

/// OLAP v1 rows: `<rows><r><Account.Name>…</Account.Name>…</r></rows>`.
/// Values are cast to i64, then f64, then kept as strings.
pub(crate) fn parse_olap_rows(xml: &str, url: &str) -> Result<Vec<Value>, UpstreamError> {
    let doc = Document::parse(xml).map_err(|e| UpstreamError::decode(url, e.to_string()))?;
    let mut rows = Vec::new();
    for r in doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "r")
    {
        let mut map = Map::new();
        for child in r.children().filter(|n| n.is_element()) {
            map.insert(child.tag_name().name().to_string(), cast_olap(&child));
        }
        rows.push(Value::Object(map));
    }
    Ok(rows)
}

fn cast_olap(node: &Node) -> Value {
    let Some(text) = node.text().map(str::trim).filter(|t| !t.is_empty()) else {
        return Value::Null;
    };
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(text.to_string())
}

/// Incoming-invoice export: `<document>` records with an `<items>` list.
/// Tag names differ from the import DTO (`product`, not `productId`), so they
/// are normalised here once.
pub(crate) fn parse_incoming_invoices(xml: &str, url: &str) -> Result<Vec<Value>, UpstreamError> {
    let doc = Document::parse(xml).map_err(|e| UpstreamError::decode(url, e.to_string()))?;
    let mut documents = Vec::new();

    for doc_el in doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "document")
    {
        let mut record = Map::new();
        let mut items: Vec<Value> = Vec::new();

        for child in doc_el.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "items" => {
                    for item_el in child
                        .children()
                        .filter(|n| n.is_element() && n.tag_name().name() == "item")
                    {
                        let mut item = Map::new();
                        for f in item_el.children().filter(|n| n.is_element()) {
                            let key = match f.tag_name().name() {
                                "product" => "productId",
                                "store" => "storeId",
                                "priceWithoutVat" => "priceWithoutVat",
                                other @ ("amount" | "actualAmount" | "price" | "sum"
                                | "vatPercent") => other,
                                _ => continue,
                            };
                            item.insert(key.to_string(), leaf_text(&f));
                        }
                        if item.get("productId").is_some_and(|v| !v.is_null()) {
                            items.push(Value::Object(item));
                        }
                    }
                }
                name @ ("id" | "dateIncoming" | "status" | "supplier" | "defaultStore") => {
                    record.insert(name.to_string(), leaf_text(&child));
                }
                _ => {}
            }
        }

        if !items.is_empty() {
            record.insert("items".to_string(), Value::Array(items));
            documents.push(Value::Object(record));
        }
    }
    Ok(documents)
}

/// Result of the XML import endpoints. The POS answers HTTP 200 even on
/// validation failure; `<valid>false</valid>` is the real verdict.
pub(crate) struct ImportResult {
    pub valid: bool,
    pub document_number: Option<String>,
    pub error_message: Option<String>,
}

pub(crate) fn parse_import_result(xml: &str) -> Option<ImportResult> {
    let doc = Document::parse(xml).ok()?;
    let root = doc.root_element();
    let field = |tag: &str| {
        root.children()
            .find(|n| n.is_element() && n.tag_name().name() == tag)
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
    };
    Some(ImportResult {
        valid: field("valid").as_deref() != Some("false"),
        document_number: field("documentNumber"),
        error_message: field("errorMessage"),
    })
}

// ── building ──

pub(crate) fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) struct XmlWriter {
    buf: String,
}

impl XmlWriter {
    pub(crate) fn new() -> Self {
        Self {
            buf: String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"),
        }
    }

    pub(crate) fn open(&mut self, tag: &str) {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
    }

    pub(crate) fn close(&mut self, tag: &str) {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
    }

    pub(crate) fn leaf(&mut self, tag: &str, text: &str) {
        self.open(tag);
        self.buf.push_str(&xml_escape(text));
        self.close(tag);
    }

    pub(crate) fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEES: &str = r#"<?xml version="1.0"?>
<employees>
  <employee>
    <id>11111111-2222-3333-4444-555555555555</id>
    <name>Иванов Иван</name>
    <employee>true</employee>
    <supplier>false</supplier>
  </employee>
  <employee>
    <id>aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</id>
    <name>Петров Пётр</name>
  </employee>
</employees>"#;

    #[test]
    fn employee_records_come_from_direct_children_only() {
        let records = parse_child_records(EMPLOYEES, "employee", "test").unwrap();
        // The nested <employee>true</employee> flags must not become records.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "Иванов Иван");
        // The flag is a leaf, so it *is* a field of the outer record.
        assert_eq!(records[0]["employee"], "true");
    }

    #[test]
    fn corporate_items_found_at_any_depth() {
        let xml = r#"<root><wrap><corporateItemDto><id>x</id><name>Бар (Центр)</name>
            </corporateItemDto></wrap><groupDto><id>y</id></groupDto></root>"#;
        let records = parse_corporate_items(xml, "test").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "Бар (Центр)");
    }

    #[test]
    fn olap_rows_cast_numbers() {
        let xml = r#"<rows><r><Account.Name>Бар (Центр)</Account.Name>
            <FinalBalance.Amount>-3.5</FinalBalance.Amount>
            <FinalBalance.Money></FinalBalance.Money></r></rows>"#;
        let rows = parse_olap_rows(xml, "test").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["FinalBalance.Amount"], Value::from(-3.5));
        assert_eq!(rows[0]["FinalBalance.Money"], Value::Null);
    }

    #[test]
    fn import_result_detects_validation_failure() {
        let xml = "<result><valid>false</valid><documentNumber>BOT-1</documentNumber>\
                   <errorMessage>товар не найден</errorMessage></result>";
        let res = parse_import_result(xml).unwrap();
        assert!(!res.valid);
        assert_eq!(res.error_message.as_deref(), Some("товар не найден"));
    }

    #[test]
    fn writer_escapes_text() {
        let mut w = XmlWriter::new();
        w.open("document");
        w.leaf("comment", "a & b <c>");
        w.close("document");
        assert!(w.finish().contains("a &amp; b &lt;c&gt;"));
    }

    #[test]
    fn incoming_invoices_normalise_item_tags() {
        let xml = r#"<incomingInvoiceDtoes><document>
            <id>d1</id><status>PROCESSED</status><supplier>s1</supplier>
            <defaultStore>st1</defaultStore>
            <items><item><product>p1</product><amount>2</amount>
              <price>10.5</price><sum>21</sum></item></items>
        </document></incomingInvoiceDtoes>"#;
        let docs = parse_incoming_invoices(xml, "test").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["items"][0]["productId"], "p1");
    }
}

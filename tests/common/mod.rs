#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

pub const HYPERLINK_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";

/// One hyperlink in a fixture document.
pub struct Link<'a> {
    pub rel_id: &'a str,
    pub target: &'a str,
    pub text: &'a str,
}

pub fn link<'a>(rel_id: &'a str, target: &'a str, text: &'a str) -> Link<'a> {
    Link {
        rel_id,
        target,
        text,
    }
}

/// A `.docx` with one paragraph per link, a body paragraph, and a table
/// whose `w:tblLook` carries the banding attributes Word writes.
pub fn build_docx(links: &[Link], body_text: &str) -> Vec<u8> {
    let mut body = format!(
        "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r><w:proofErr w:type=\"spellStart\"/></w:p>",
        body_text
    );
    body.push_str(
        "<w:tbl><w:tblPr><w:tblLook w:val=\"04A0\" w:firstRow=\"1\" w:lastRow=\"0\" w:firstColumn=\"1\" w:lastColumn=\"0\" w:noHBand=\"0\" w:noVBand=\"1\"/></w:tblPr>\
         <w:tr><w:tc><w:p><w:r><w:t>Cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
    );
    let mut rels = String::new();
    for l in links {
        body.push_str(&format!(
            "<w:p><w:hyperlink r:id=\"{}\" w:history=\"1\"><w:r><w:rPr><w:rStyle w:val=\"Hyperlink\"/><w:b/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r></w:hyperlink></w:p>",
            l.rel_id, l.text
        ));
        rels.push_str(&format!(
            "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\" TargetMode=\"External\"/>",
            l.rel_id,
            HYPERLINK_REL,
            l.target.replace('&', "&amp;")
        ));
    }

    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <w:body>{}<w:sectPr/></w:body></w:document>",
        body
    );
    let document_rels = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>{}</Relationships>",
        rels
    );

    let parts: [(&str, String); 7] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("word/document.xml", document),
        ("word/_rels/document.xml.rels", document_rels),
        ("word/styles.xml", STYLES.to_string()),
        ("docProps/core.xml", CORE.to_string()),
        ("docProps/app.xml", APP.to_string()),
    ];

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in parts {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

pub fn write_docx(dir: &Path, name: &str, links: &[Link], body_text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, build_docx(links, body_text)).unwrap();
    path
}

pub fn write_config(dir: &Path, lookup_url: &str) -> PathBuf {
    let config_dir = dir.join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    let path = config_dir.join("lnk.toml");
    std::fs::write(
        &path,
        format!(
            r#"[lookup]
url = "{}"
timeout_secs = 2
margin_secs = 1

[links]
retarget_base = "https://thesource.example.com/content/"

[retry.network]
max_attempts = 1
base_delay_ms = 1
max_delay_ms = 1
backoff = "fixed"
"#,
            lookup_url
        ),
    )
    .unwrap();
    path
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="character" w:styleId="Hyperlink"><w:name w:val="Hyperlink"/><w:rPr><w:color w:val="0563C1"/><w:u w:val="single"/></w:rPr></w:style></w:styles>"#;

const CORE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Procedures</dc:title><dc:creator>Records Office</dc:creator></cp:coreProperties>"#;

const APP: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties"><Words>120</Words></Properties>"#;

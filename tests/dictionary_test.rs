#![cfg(unix)]

use std::{fs, os::unix::fs::PermissionsExt, path::Path, sync::OnceLock};

use anyhow::Result;
use tempfile::TempDir;

use osabridge::config::Settings;
use osabridge::runner::read_dictionary;
use osabridge::sdef::{DictionaryView, Projection, QueryMatch};
use osabridge::Error;

const NOTES_SDEF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE dictionary SYSTEM "file://localhost/System/Library/DTDs/sdef.dtd">
<dictionary title="Notes Terminology">
  <suite name="Notes Suite" code="note" description="Terms for Notes">
    <class name="note" code="note" plural="notes" description="a note">
      <property name="name" code="pnam" type="text" description="the title"/>
      <property name="body" code="body" type="text"/>
      <responds-to command="show"/>
    </class>
    <command name="show" code="notesshw" description="Show an object">
      <direct-parameter type="specifier"/>
      <parameter name="separately" code="sepa" type="boolean" optional="yes"/>
    </command>
  </suite>
</dictionary>
"#;

// Prints the Notes dictionary; any target containing "Missing" fails.
fn sdef_stub() -> &'static Path {
    static DIR: OnceLock<TempDir> = OnceLock::new();
    let dir = DIR.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        let fixture = dir.path().join("notes.sdef");
        fs::write(&fixture, NOTES_SDEF).unwrap();
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in *Missing*) echo \"sdef: $1: no scripting dictionary\" >&2; exit 1 ;; esac\ncat '{}'\n",
            fixture.display()
        );
        let stub = dir.path().join("sdef");
        fs::write(&stub, script).unwrap();
        fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();
        dir
    });
    dir.path()
}

fn settings() -> Settings {
    Settings { sdef_tool: sdef_stub().join("sdef"), ..Settings::default() }
}

#[tokio::test]
async fn test_overview_from_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("Notes.sdef");
    fs::write(&path, NOTES_SDEF)?;

    let view = read_dictionary(&settings(), &path.to_string_lossy(), &Projection::Overview).await?;
    let json = serde_json::to_value(&view)?;
    assert_eq!(json["applicationName"], "Notes");
    let suite = &json["suites"][0];
    assert_eq!(suite["name"], "Notes Suite");
    assert_eq!(suite["classes"][0]["name"], "note");
    assert_eq!(suite["classes"][0]["propertyCount"], 2);
    assert_eq!(suite["classes"][0]["respondsToCount"], 1);
    // direct parameter counts too
    assert_eq!(suite["commands"][0]["parameterCount"], 2);
    Ok(())
}

#[tokio::test]
async fn test_query_through_sdef_tool() -> Result<()> {
    let tokens = vec!["class:note".to_string(), "command:delete".to_string(), "bogus".to_string()];
    let view = read_dictionary(&settings(), "/Applications/Notes.app", &Projection::Query(tokens)).await?;

    let DictionaryView::Matches(matches) = view else {
        panic!("expected query matches");
    };
    assert_eq!(matches.len(), 3);
    assert!(matches!(&matches[0], QueryMatch::Found { query, matches } if query == "class:note" && matches.len() == 1));
    assert!(matches!(&matches[1], QueryMatch::NotFound { query, .. } if query == "command:delete"));
    assert!(matches!(&matches[2], QueryMatch::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_raw_query_emits_xml_fragments() -> Result<()> {
    let tokens = vec!["command:show".to_string(), "class:folder".to_string()];
    let view = read_dictionary(&settings(), "Notes", &Projection::Raw(tokens)).await?;

    let DictionaryView::Raw(xml) = view else {
        panic!("expected raw xml");
    };
    assert!(xml.contains("<!-- query: command:show -->"));
    assert!(xml.contains("<command name=\"show\""));
    assert!(xml.contains("<!-- not found: class:folder"));
    Ok(())
}

#[tokio::test]
async fn test_tool_failure_is_dictionary_unavailable() -> Result<()> {
    let err = read_dictionary(&settings(), "/Applications/Missing.app", &Projection::Overview)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DictionaryUnavailable(ref msg) if msg.contains("no scripting dictionary")));
    Ok(())
}

#[tokio::test]
async fn test_malformed_file_is_xml_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("Broken.sdef");
    fs::write(&path, "<dictionary><suite></dictionary>")?;

    let err = read_dictionary(&settings(), &path.to_string_lossy(), &Projection::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Xml(_)));
    Ok(())
}

//! Form 4 ownership document parsing.
//!
//! One document can carry several reporting owners and several
//! non-derivative transactions. Every transaction is attributed to each
//! reporting owner, so a joint filing yields `owners x transactions` records.

use crate::domain::transaction::{TransactionKind, TransactionRecord};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use roxmltree::{Document, Node};

#[derive(Debug, Clone, PartialEq)]
struct Owner {
    name: String,
    role: String,
}

pub fn parse_form4(xml: &str, accession_number: Option<&str>) -> Result<Vec<TransactionRecord>> {
    let doc = Document::parse(xml).context("form 4 document is not well-formed XML")?;
    let root = doc.root_element();
    anyhow::ensure!(
        root.has_tag_name("ownershipDocument"),
        "unexpected root element <{}>",
        root.tag_name().name()
    );

    let ticker = child_path_text(root, &["issuer", "issuerTradingSymbol"])
        .map(|t| t.to_ascii_uppercase())
        .context("issuerTradingSymbol missing")?;

    let owners: Vec<Owner> = root
        .children()
        .filter(|n| n.has_tag_name("reportingOwner"))
        .filter_map(parse_owner)
        .collect();
    anyhow::ensure!(!owners.is_empty(), "no reporting owner in form 4");

    let mut out = Vec::new();
    for txn in root
        .descendants()
        .filter(|n| n.has_tag_name("nonDerivativeTransaction"))
    {
        let Some((date, kind, shares, price)) = parse_transaction(txn) else {
            continue;
        };
        for owner in &owners {
            let mut record =
                TransactionRecord::new(&ticker, &owner.name, &owner.role, date, kind, shares, price);
            if let Some(acc) = accession_number {
                record = record.with_accession_number(acc);
            }
            out.push(record);
        }
    }

    Ok(out)
}

fn parse_owner(node: Node<'_, '_>) -> Option<Owner> {
    let name = child_path_text(node, &["reportingOwnerId", "rptOwnerName"])?;
    let rel = node
        .children()
        .find(|n| n.has_tag_name("reportingOwnerRelationship"));

    let mut roles = Vec::new();
    if let Some(rel) = rel {
        if flag(rel, "isOfficer") {
            match child_path_text(rel, &["officerTitle"]) {
                Some(title) => roles.push(title),
                None => roles.push("Officer".to_string()),
            }
        }
        if flag(rel, "isDirector") {
            roles.push("Director".to_string());
        }
        if flag(rel, "isTenPercentOwner") {
            roles.push("10% Owner".to_string());
        }
        if flag(rel, "isOther") {
            if let Some(other) = child_path_text(rel, &["otherText"]) {
                roles.push(other);
            }
        }
    }

    Some(Owner {
        name,
        role: roles.join(", "),
    })
}

/// Returns `None` for unrecognized codes or incomplete amounts.
fn parse_transaction(node: Node<'_, '_>) -> Option<(NaiveDate, TransactionKind, f64, f64)> {
    let code = child_path_text(node, &["transactionCoding", "transactionCode"])?;
    let kind = TransactionKind::from_code(&code)?;

    let date_text = child_path_text(node, &["transactionDate", "value"])?;
    // Dates occasionally carry a timezone suffix (2026-01-27-05:00).
    let date = NaiveDate::parse_from_str(date_text.get(..10)?, "%Y-%m-%d").ok()?;

    let shares = parse_num(&child_path_text(
        node,
        &["transactionAmounts", "transactionShares", "value"],
    )?)?;
    // Awards are often reported without a price.
    let price = child_path_text(
        node,
        &["transactionAmounts", "transactionPricePerShare", "value"],
    )
    .and_then(|s| parse_num(&s))
    .unwrap_or(0.0);

    Some((date, kind, shares, price))
}

fn child_path_text(node: Node<'_, '_>, path: &[&str]) -> Option<String> {
    let mut cur = node;
    for name in path {
        cur = cur.children().find(|n| n.has_tag_name(*name))?;
    }
    let text = cur.text()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn flag(node: Node<'_, '_>, name: &str) -> bool {
    matches!(
        child_path_text(node, &[name]).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("True")
    )
}

fn parse_num(s: &str) -> Option<f64> {
    let v = s.trim().replace(',', "").parse::<f64>().ok()?;
    v.is_finite().then_some(v)
}

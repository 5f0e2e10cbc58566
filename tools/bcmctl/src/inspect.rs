//! `layout` and `decode` commands

use anyhow::{bail, Result};
use colored::*;
use serde::Serialize;

use bcm_cases::layout::{self, NUM_INPUTS};
use bcm_cases::{CaseRecord, CaseSide, CaseStorage, CaseStore, MemoryStore};

#[derive(Debug, Serialize)]
struct LayoutRow {
    input: u8,
    on_cases: u8,
    on_address: Option<u16>,
    off_cases: u8,
    off_address: Option<u16>,
}

fn layout_rows() -> Vec<LayoutRow> {
    (0..NUM_INPUTS as u8)
        .map(|input| LayoutRow {
            input,
            on_cases: layout::case_count(input, CaseSide::On),
            on_address: layout::case_address(input, 0, CaseSide::On).ok(),
            off_cases: layout::case_count(input, CaseSide::Off),
            off_address: layout::case_address(input, 0, CaseSide::Off).ok(),
        })
        .collect()
}

fn address_cell(address: Option<u16>) -> String {
    address
        .map(|a| format!("0x{:04X}", a))
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_layout(json: bool) -> Result<()> {
    let rows = layout_rows();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<6} {:>4} {:>8}   {:>4} {:>8}", "INPUT", "ON", "ADDR", "OFF", "ADDR").bold()
    );
    for row in &rows {
        println!(
            "IN{:02}   {:>4} {:>8}   {:>4} {:>8}",
            row.input + 1,
            row.on_cases,
            address_cell(row.on_address),
            row.off_cases,
            address_cell(row.off_address)
        );
    }
    let on_total: u32 = rows.iter().map(|r| r.on_cases as u32).sum();
    let off_total: u32 = rows.iter().map(|r| r.off_cases as u32).sum();
    println!();
    println!(
        "{} {} ON cases, {} OFF cases",
        "Total:".bright_cyan(),
        on_total,
        off_total
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct DecodedCase {
    input: u8,
    case_index: u8,
    side: CaseSide,
    address: u16,
    record: CaseRecord,
}

fn decode_input<S: CaseStorage>(store: &CaseStore<S>, input: u8) -> Vec<DecodedCase> {
    let mut decoded = Vec::new();
    for side in [CaseSide::On, CaseSide::Off] {
        for case_index in 0..layout::case_count(input, side) {
            let Ok(address) = store.resolve_address(input, case_index, side) else {
                continue;
            };
            match store.decode_case(address) {
                Ok(record) => decoded.push(DecodedCase {
                    input,
                    case_index,
                    side,
                    address,
                    record,
                }),
                Err(e) => eprintln!(
                    "{} IN{:02} {} case {}: {}",
                    "ERROR".red(),
                    input + 1,
                    side,
                    case_index,
                    e
                ),
            }
        }
    }
    decoded
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_case(case: &DecodedCase, all: bool) {
    let label = format!(
        "IN{:02} {:<3} #{} @0x{:04X}",
        case.input + 1,
        case.side,
        case.case_index,
        case.address
    );
    let record = &case.record;
    if !record.valid {
        if all {
            println!("{}  {}", label, "unconfigured".dimmed());
        }
        return;
    }

    let mut flags = Vec::new();
    if record.config.is_ignition_input() {
        flags.push("ignition");
    }
    if record.config.is_overridable() {
        flags.push("overridable");
    }
    if record.config.is_one_button_start() {
        flags.push("one-button");
    }
    if record.config.is_track_ignition() {
        flags.push("track-ign");
    }

    println!(
        "{}  P{} {}  {}  pattern {}/{}  {}",
        label.bright_white(),
        record.priority,
        record.id.to_string().bright_yellow(),
        hex(&record.payload),
        record.pattern_on,
        record.pattern_off,
        flags.join(",").bright_cyan()
    );
    if record.must_be_on != [0; 8] || record.must_be_off != [0; 8] {
        println!(
            "      must-be-on {}  must-be-off {}",
            hex(&record.must_be_on),
            hex(&record.must_be_off)
        );
    }
}

pub fn decode_image(image: MemoryStore, input: Option<u8>, all: bool, json: bool) -> Result<()> {
    let inputs: Vec<u8> = match input {
        Some(n) if n == 0 || n as usize > NUM_INPUTS => {
            bail!("Input must be within 1..={}", NUM_INPUTS)
        },
        Some(n) => vec![n - 1],
        None => (0..NUM_INPUTS as u8).collect(),
    };

    let store = CaseStore::new(image);
    let decoded: Vec<DecodedCase> = inputs
        .iter()
        .flat_map(|&input| decode_input(&store, input))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
    } else {
        for case in &decoded {
            print_case(case, all || input.is_some());
        }
        let configured = decoded.iter().filter(|c| c.record.valid).count();
        println!();
        println!(
            "{} {} configured of {} slots, {} store reads, {} bounds errors",
            "Summary:".bright_cyan(),
            configured,
            decoded.len(),
            store.read_count(),
            store.bounds_errors()
        );
    }
    Ok(())
}

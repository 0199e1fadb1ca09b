#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;

/// Registers an admin (1), a client (2) and a verified technician (3).
pub const BOOTSTRAP: [&str; 3] = [
    r#"{"op": "register_user", "role": "admin", "first_name": "Ada", "last_name": "Admin", "email": "admin@example.com"}"#,
    r#"{"op": "register_user", "role": "client", "first_name": "Carl", "last_name": "Client", "email": "carl@example.com"}"#,
    r#"{"op": "register_user", "role": "technician", "first_name": "Tia", "last_name": "Tech", "email": "tia@example.com", "verified": true}"#,
];

/// Client 2 funds its wallet, opens order 1 and accepts technician 3's offer at `price`.
pub fn accepted_order(price: &str) -> Vec<String> {
    vec![
        r#"{"op": "deposit", "actor": 2, "amount": "500"}"#.to_string(),
        r#"{"op": "create_order", "actor": 2, "service_id": 1, "problem_description": "Leaking sink", "requested_location": "Cairo", "scheduled_date": "2025-03-01"}"#.to_string(),
        format!(r#"{{"op": "submit_offer", "actor": 3, "order": 1, "price": "{price}"}}"#),
        r#"{"op": "accept_offer", "actor": 2, "order": 1, "offer": 1}"#.to_string(),
    ]
}

/// Writes the bootstrap users followed by `lines` to a temporary JSONL file.
pub fn commands_file<S: AsRef<str>>(lines: &[S]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in BOOTSTRAP {
        writeln!(file, "{line}").unwrap();
    }
    for line in lines {
        writeln!(file, "{}", line.as_ref()).unwrap();
    }
    file
}

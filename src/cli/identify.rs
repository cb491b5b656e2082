use anyhow::{anyhow, Result};

use super::serve::types::IdentifyResponse;
use crate::db::Database;
use crate::engine::IdentifyError;
use crate::models::{ContactGroup, ContactId};

/// Execute the identify command: reconcile one fact and print the JSON
/// response the HTTP endpoint would return.
pub fn run_identify(db: &mut Database, email: Option<&str>, phone: Option<&str>) -> Result<()> {
    let contact = db.identify(email, phone)?;
    let response = IdentifyResponse { contact };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Execute the show command: print the group containing a contact.
pub fn run_show(db: &Database, id: ContactId) -> Result<()> {
    let group = db.contact_group(id)?;
    print_group(&group);
    Ok(())
}

/// Execute the delete command: soft-delete a single contact.
///
/// A primary that still has live secondaries is refused, since removing it
/// would leave them without a group.
pub fn run_delete(db: &Database, id: ContactId) -> Result<()> {
    match db.contact_group(id) {
        Ok(group) if group.primary.id == id && !group.secondaries.is_empty() => {
            return Err(anyhow!(
                "Contact {} is the primary of {} other contact(s); delete those first.",
                id,
                group.secondaries.len()
            ));
        }
        Ok(_) => {}
        Err(IdentifyError::NotFound(missing)) if missing == id => {
            println!("No contact found with ID: {}", id);
            return Ok(());
        }
        // A secondary whose primary is gone heads no group; it can go too.
        Err(IdentifyError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    if db.soft_delete_contact(id)? {
        println!("Deleted contact {}.", id);
    } else {
        println!("No contact found with ID: {}", id);
    }
    Ok(())
}

fn print_group(group: &ContactGroup) {
    let consolidated = group.consolidate();

    println!("Primary contact {}", group.primary.id);
    println!("  Emails:  {}", join_or_dash(&consolidated.emails));
    println!("  Phones:  {}", join_or_dash(&consolidated.phone_numbers));
    println!();

    for contact in group.members() {
        println!(
            "  #{:<6} {:<9} {:<30} {:<16} created {}",
            contact.id,
            contact.link_precedence,
            contact.email.as_deref().unwrap_or("-"),
            contact.phone_number.as_deref().unwrap_or("-"),
            contact.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn join_or_dash(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

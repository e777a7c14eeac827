use crate::core::backup::ConversationBackup;
use crate::core::conversation::{ConversationStatus, TurnRole};
use crate::core::timestamp;
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.len()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_warning(text: &str) {
    eprintln!("{}", text.yellow());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

fn status_label(status: ConversationStatus) -> ColoredString {
    match status {
        ConversationStatus::InProgress => status.to_string().yellow(),
        ConversationStatus::Completed => status.to_string().green(),
        ConversationStatus::Abandoned => status.to_string().dimmed(),
    }
}

/// One line per backup for listings
pub fn print_backup_line(backup: &ConversationBackup) {
    let data = &backup.conversation_data;
    let product = &data.extracted_info().product_type;
    println!(
        "{}  {}  {:<11}  rev {:<3} {} turns  {}",
        data.id.bold(),
        timestamp::format(&backup.timestamp).dimmed(),
        status_label(data.status()),
        backup.revision,
        data.turns().len(),
        if product.is_empty() { "-" } else { product.as_str() }
    );
}

pub fn print_backup_details(backup: &ConversationBackup) {
    let data = &backup.conversation_data;
    print_header(&format!("Conversation {}", data.id));
    println!("User:      {}", data.user_id);
    println!("Language:  {}", data.language);
    println!("Status:    {}", status_label(data.status()));
    println!("Started:   {}", timestamp::format(&data.started_at));
    if let Some(completed_at) = data.completed_at() {
        println!("Completed: {}", timestamp::format(&completed_at));
    }
    println!("Saved:     {} (revision {})", timestamp::format(&backup.timestamp), backup.revision);
    println!("Stage:     {}", backup.conversation_state.current_stage);

    let info = data.extracted_info();
    let missing = info.missing_required_fields();
    if missing.is_empty() {
        print_success("Product details complete");
    } else {
        print_warning(&format!("Missing product details: {}", missing.join(", ")));
    }

    if !data.summary().is_empty() {
        println!("\n{}", data.summary());
    }

    for turn in data.turns() {
        let speaker = match turn.role {
            TurnRole::AiQuestion => "AI  ".cyan(),
            TurnRole::UserResponse => "User".magenta(),
        };
        println!("{} {}", speaker, turn.content);
    }
}

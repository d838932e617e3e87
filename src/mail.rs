//! Outbound email capability.
//!
//! The actual transport and HTML template rendering live outside this
//! crate; the pipeline only needs a capability that accepts a subject,
//! a body and recipients, and reports whether the message went out. The
//! bundled implementation logs the message, which is what the worker
//! daemon runs with unless an integration supplies a real sender.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use crate::error::PlanError;
use crate::shopping::CategorizedShoppingList;
use crate::types::GeneratedMeal;

/// Transactional email capability.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message. Returns true when the message was handed to
    /// the transport successfully. Implementations report transport
    /// failures as [`PlanError::MailFailed`].
    async fn send(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> Result<bool, PlanError>;
}

/// Logs outbound mail instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl EmailSender for LogMailer {
    async fn send(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> Result<bool, PlanError> {
        info!(
            subject = %subject,
            recipients = ?recipients,
            body_bytes = html_body.len(),
            "mail delivery delegated to log"
        );
        Ok(true)
    }
}

/// Minimal digest body, a stand-in for the external template renderer.
/// Items with a product link render as store search links.
pub fn render_plan_digest(
    week_label: &str,
    meals: &[GeneratedMeal],
    shopping_list: &CategorizedShoppingList,
    product_links: &HashMap<String, String>,
) -> String {
    let mut body = String::new();
    body.push_str(&format!("<h1>Dinner plan, {}</h1>\n<ul>\n", week_label));
    for meal in meals {
        body.push_str(&format!(
            "<li><strong>{}</strong>: {} ({:.0} cal, {:.0}g protein)</li>\n",
            meal.day, meal.name, meal.nutrition.calories, meal.nutrition.protein
        ));
    }
    body.push_str("</ul>\n<h2>Shopping list</h2>\n");
    for section in &shopping_list.sections {
        body.push_str(&format!("<h3>{}</h3>\n<ul>\n", section.category.as_str()));
        for item in &section.items {
            match product_links.get(&item.item) {
                Some(link) => body.push_str(&format!(
                    "<li><a href=\"{}\">{}</a> — {}</li>\n",
                    link, item.item, item.amount
                )),
                None => {
                    body.push_str(&format!("<li>{} — {}</li>\n", item.item, item.amount))
                }
            }
        }
        body.push_str("</ul>\n");
    }
    body
}

/// Subject line for a weekly plan message.
pub fn plan_subject(week_label: &str) -> String {
    format!("Your High-Protein Dinner Meal Plan - {}", week_label)
}

//! Collaborators the stages talk to: the sourcing database and the mail transport.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tracing::info;

use super::payload::{Offer, Rfq, Supplier, SupplierReply};
use crate::error::StageError;

/// An invitation ready to hand to the mail transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub rfq_id: String,
    pub supplier_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Everything stages need from outside the queue store.
///
/// Implementations bound their own I/O; stages call them without timeouts.
pub trait SourcingBackend: Send + Sync + 'static {
    fn load_rfq(&self, rfq_id: &str) -> impl Future<Output = Result<Option<Rfq>, StageError>> + Send;

    /// Candidate suppliers for a category.
    fn find_suppliers(
        &self,
        category: &str,
    ) -> impl Future<Output = Result<Vec<Supplier>, StageError>> + Send;

    fn send_invitation(
        &self,
        invitation: &Invitation,
    ) -> impl Future<Output = Result<(), StageError>> + Send;

    /// Replies received so far for an RFQ from any of `suppliers`.
    fn fetch_replies(
        &self,
        rfq_id: &str,
        suppliers: &[Supplier],
    ) -> impl Future<Output = Result<Vec<SupplierReply>, StageError>> + Send;

    fn find_supplier(
        &self,
        supplier_id: &str,
    ) -> impl Future<Output = Result<Option<Supplier>, StageError>> + Send;

    fn store_offer(&self, offer: &Offer) -> impl Future<Output = Result<(), StageError>> + Send;

    fn update_rfq_status(
        &self,
        rfq_id: &str,
        status: &str,
    ) -> impl Future<Output = Result<(), StageError>> + Send;
}

#[derive(Debug, Default)]
struct Directory {
    rfqs: HashMap<String, Rfq>,
    suppliers: Vec<Supplier>,
    replies: HashMap<String, Vec<SupplierReply>>,
    undeliverable: Vec<String>,
    invitations: Vec<Invitation>,
    offers: Vec<Offer>,
    rfq_statuses: HashMap<String, String>,
}

/// In-process backend. Reads come from a seeded directory, side effects are
/// logged and kept for inspection. Nothing leaves the process.
#[derive(Debug, Default)]
pub struct LoggingBackend {
    directory: Mutex<Directory>,
}

impl LoggingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn directory(&self) -> Result<MutexGuard<'_, Directory>, StageError> {
        self.directory
            .lock()
            .map_err(|_| StageError::system("backend directory lock poisoned"))
    }

    pub fn with_rfq(self, rfq: Rfq) -> Self {
        if let Ok(mut dir) = self.directory.lock() {
            dir.rfqs.insert(rfq.id.clone(), rfq);
        }
        self
    }

    pub fn with_supplier(self, supplier: Supplier) -> Self {
        if let Ok(mut dir) = self.directory.lock() {
            dir.suppliers.push(supplier);
        }
        self
    }

    pub fn with_reply(self, rfq_id: &str, reply: SupplierReply) -> Self {
        if let Ok(mut dir) = self.directory.lock() {
            dir.replies.entry(rfq_id.to_string()).or_default().push(reply);
        }
        self
    }

    /// Invitations to `email` will fail to send.
    pub fn with_undeliverable(self, email: &str) -> Self {
        if let Ok(mut dir) = self.directory.lock() {
            dir.undeliverable.push(email.to_string());
        }
        self
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.directory().map(|d| d.invitations.clone()).unwrap_or_default()
    }

    pub fn stored_offers(&self) -> Vec<Offer> {
        self.directory().map(|d| d.offers.clone()).unwrap_or_default()
    }

    pub fn rfq_status(&self, rfq_id: &str) -> Option<String> {
        self.directory().ok()?.rfq_statuses.get(rfq_id).cloned()
    }
}

impl SourcingBackend for LoggingBackend {
    async fn load_rfq(&self, rfq_id: &str) -> Result<Option<Rfq>, StageError> {
        Ok(self.directory()?.rfqs.get(rfq_id).cloned())
    }

    async fn find_suppliers(&self, category: &str) -> Result<Vec<Supplier>, StageError> {
        let category = category.to_lowercase();
        let dir = self.directory()?;
        Ok(dir
            .suppliers
            .iter()
            .filter(|s| s.categories.iter().any(|c| c.to_lowercase() == category))
            .cloned()
            .collect())
    }

    async fn send_invitation(&self, invitation: &Invitation) -> Result<(), StageError> {
        let mut dir = self.directory()?;
        if dir.undeliverable.contains(&invitation.recipient) {
            return Err(StageError::system("SMTP delivery failed"));
        }
        info!(
            rfq_id = %invitation.rfq_id,
            recipient = %invitation.recipient,
            subject = %invitation.subject,
            "invitation sent"
        );
        dir.invitations.push(invitation.clone());
        Ok(())
    }

    async fn fetch_replies(
        &self,
        rfq_id: &str,
        suppliers: &[Supplier],
    ) -> Result<Vec<SupplierReply>, StageError> {
        let dir = self.directory()?;
        let Some(replies) = dir.replies.get(rfq_id) else {
            return Ok(Vec::new());
        };
        Ok(replies
            .iter()
            .filter(|reply| {
                suppliers.is_empty()
                    || suppliers
                        .iter()
                        .any(|s| s.email == reply.supplier_email || (s.id.is_some() && s.id == reply.supplier_id))
            })
            .cloned()
            .collect())
    }

    async fn find_supplier(&self, supplier_id: &str) -> Result<Option<Supplier>, StageError> {
        Ok(self
            .directory()?
            .suppliers
            .iter()
            .find(|s| s.id.as_deref() == Some(supplier_id))
            .cloned())
    }

    async fn store_offer(&self, offer: &Offer) -> Result<(), StageError> {
        info!(
            rfq_id = %offer.rfq_id,
            supplier_id = offer.supplier_id.as_deref().unwrap_or("unknown"),
            total_price = offer.total_price,
            "offer stored"
        );
        self.directory()?.offers.push(offer.clone());
        Ok(())
    }

    async fn update_rfq_status(&self, rfq_id: &str, status: &str) -> Result<(), StageError> {
        info!(rfq_id, status, "rfq status updated");
        self.directory()?
            .rfq_statuses
            .insert(rfq_id.to_string(), status.to_string());
        Ok(())
    }
}

//! Exchange Web Services mailbox adapter.
//!
//! Speaks SOAP over HTTPS with basic authentication. Requests are built as
//! plain strings and responses are read through [`XmlNode`], which keeps the
//! parsing side testable without a server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use crate::config::MailboxKind;

use super::error::{MailboxError, Result};
use super::xml::XmlNode;
use super::{Attachment, Mailbox, Message, MessageSummary};

/// Items requested per FindItem page.
const PAGE_SIZE: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const ITEM_NOT_FOUND: &str = "ErrorItemNotFound";

/// Builds the EWS endpoint from a host name or a full URL.
pub fn endpoint_for(server: &str) -> Result<String> {
    let server = server.trim();
    if server.is_empty() {
        return Err(MailboxError::ConfigError(
            "Exchange server must not be empty".to_string(),
        ));
    }
    if server.starts_with("http://") || server.starts_with("https://") {
        Ok(server.to_string())
    } else {
        Ok(format!(
            "https://{}/EWS/Exchange.asmx",
            server.trim_end_matches('/')
        ))
    }
}

/// Parent folder reference in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FolderRef {
    Distinguished(&'static str),
    Id(String),
}

impl FolderRef {
    fn to_xml(&self) -> String {
        match self {
            FolderRef::Distinguished(name) => format!(r#"<t:DistinguishedFolderId Id="{}"/>"#, name),
            FolderRef::Id(id) => format!(r#"<t:FolderId Id="{}"/>"#, escape(id.as_str())),
        }
    }
}

/// Header fields of an item returned by GetItem.
#[derive(Debug, Clone, PartialEq)]
pub struct EwsItem {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    /// Ids of file attachments, in message order.
    pub attachment_ids: Vec<String>,
}

/// Exchange mailbox reached through EWS.
pub struct ExchangeMailbox {
    endpoint: String,
    email: String,
    password: SecretString,
    client: reqwest::Client,
    connected: bool,
    current_folder: String,
    folder_ids: HashMap<(bool, String), FolderRef>,
}

impl ExchangeMailbox {
    pub fn new(server: &str, email: String, password: SecretString) -> Result<Self> {
        let endpoint = endpoint_for(server)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            endpoint,
            email,
            password,
            client,
            connected: false,
            current_folder: String::new(),
            folder_ids: HashMap::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MailboxError::NotConnected)
        }
    }

    /// Posts a SOAP body and returns the parsed, error-checked response.
    async fn call(&self, body: &str) -> Result<XmlNode> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.email, Some(self.password.expose_secret()))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(soap_envelope(body))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(MailboxError::AuthenticationFailed(format!(
                "{} rejected the credentials of {} ({})",
                self.endpoint, self.email, status
            )));
        }

        let text = response.text().await?;
        // SOAP faults arrive with status 500 and a readable body
        if !status.is_success() && status != StatusCode::INTERNAL_SERVER_ERROR {
            return Err(MailboxError::Http(format!(
                "{} returned {}",
                self.endpoint, status
            )));
        }

        let doc = XmlNode::parse(&text)?;
        check_response(&doc)?;
        Ok(doc)
    }

    /// Resolves `folder` to a folder reference, walking `/`-separated segments
    /// below the mailbox inbox or the public folder root.
    async fn resolve_folder(&mut self, folder: &str, public: bool) -> Result<FolderRef> {
        if !public && (folder.is_empty() || folder.eq_ignore_ascii_case("inbox")) {
            return Ok(FolderRef::Distinguished("inbox"));
        }

        let key = (public, folder.to_string());
        if let Some(found) = self.folder_ids.get(&key) {
            return Ok(found.clone());
        }

        let mut parent = if public {
            info!("Selecting public folder: {}", folder);
            FolderRef::Distinguished("publicfoldersroot")
        } else {
            FolderRef::Distinguished("inbox")
        };

        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            let doc = self.call(&find_folder_request(&parent, segment)).await?;
            parent = match parse_folder_id(&doc) {
                Some(id) => FolderRef::Id(id),
                None => return Err(MailboxError::FolderNotFound(folder.to_string())),
            };
        }

        debug!("Resolved folder '{}' to {:?}", folder, parent);
        self.folder_ids.insert(key, parent.clone());
        Ok(parent)
    }
}

#[async_trait]
impl Mailbox for ExchangeMailbox {
    fn kind(&self) -> MailboxKind {
        MailboxKind::Exchange
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        info!("Connecting to Exchange server at {}", self.endpoint);
        self.call(&get_folder_request(&FolderRef::Distinguished("inbox")))
            .await?;
        self.connected = true;
        info!("Connected to Exchange as {}", self.email);
        Ok(())
    }

    async fn list_message_ids(&mut self, folder: &str, public: bool) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let parent = self.resolve_folder(folder, public).await?;
        self.current_folder = folder.to_string();

        let mut ids = Vec::new();
        loop {
            let doc = self.call(&find_item_request(&parent, ids.len())).await?;
            let (page, last) = parse_find_item(&doc);
            let empty = page.is_empty();
            ids.extend(page);
            if last || empty {
                break;
            }
        }

        info!("Found {} messages in '{}'", ids.len(), folder);
        Ok(ids)
    }

    async fn fetch_summary(&mut self, id: &str) -> Result<Option<MessageSummary>> {
        self.ensure_connected()?;

        match self.call(&get_summary_request(id)).await {
            Ok(doc) => Ok(parse_summary(&doc)),
            Err(MailboxError::Ews { code, .. }) if code == ITEM_NOT_FOUND => {
                warn!("Message {} no longer exists", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_message(&mut self, id: &str) -> Result<Option<Message>> {
        self.ensure_connected()?;

        let doc = match self.call(&get_item_request(id)).await {
            Ok(doc) => doc,
            Err(MailboxError::Ews { code, .. }) if code == ITEM_NOT_FOUND => {
                warn!("Message {} no longer exists", id);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(item) = parse_get_item(&doc) else {
            return Ok(None);
        };

        let attachments = if item.attachment_ids.is_empty() {
            Vec::new()
        } else {
            let doc = self
                .call(&get_attachment_request(&item.attachment_ids))
                .await?;
            parse_attachments(&doc)?
        };

        let received_at = item.received_at.unwrap_or_else(|| {
            warn!("Message {} has no receipt time, using current time", id);
            Utc::now()
        });

        Ok(Some(Message {
            id: item.id,
            subject: item.subject,
            sender: item.sender,
            recipient: item.recipient,
            received_at,
            is_read: item.is_read,
            folder: self.current_folder.clone(),
            attachments,
        }))
    }

    async fn mark_read(&mut self, id: &str) -> Result<()> {
        self.ensure_connected()?;
        self.call(&mark_read_request(id)).await?;
        debug!("Marked {} as read", id);
        Ok(())
    }

    async fn delete_message(&mut self, id: &str) -> Result<()> {
        self.ensure_connected()?;
        self.call(&delete_item_request(id)).await?;
        info!("Moved message {} to Deleted Items", id);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            info!("Closing Exchange session");
        }
        // EWS is stateless; there is nothing to close on the server
        self.connected = false;
        Ok(())
    }
}

fn soap_envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/""#,
            r#" xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types""#,
            r#" xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages">"#,
            r#"<soap:Header><t:RequestServerVersion Version="Exchange2013"/></soap:Header>"#,
            r#"<soap:Body>{}</soap:Body></soap:Envelope>"#
        ),
        body
    )
}

fn get_folder_request(folder: &FolderRef) -> String {
    format!(
        concat!(
            r#"<m:GetFolder><m:FolderShape><t:BaseShape>IdOnly</t:BaseShape></m:FolderShape>"#,
            r#"<m:FolderIds>{}</m:FolderIds></m:GetFolder>"#
        ),
        folder.to_xml()
    )
}

fn find_folder_request(parent: &FolderRef, display_name: &str) -> String {
    format!(
        concat!(
            r#"<m:FindFolder Traversal="Shallow">"#,
            r#"<m:FolderShape><t:BaseShape>IdOnly</t:BaseShape></m:FolderShape>"#,
            r#"<m:Restriction><t:IsEqualTo><t:FieldURI FieldURI="folder:DisplayName"/>"#,
            r#"<t:FieldURIOrConstant><t:Constant Value="{}"/></t:FieldURIOrConstant>"#,
            r#"</t:IsEqualTo></m:Restriction>"#,
            r#"<m:ParentFolderIds>{}</m:ParentFolderIds></m:FindFolder>"#
        ),
        escape(display_name),
        parent.to_xml()
    )
}

fn find_item_request(parent: &FolderRef, offset: usize) -> String {
    format!(
        concat!(
            r#"<m:FindItem Traversal="Shallow">"#,
            r#"<m:ItemShape><t:BaseShape>IdOnly</t:BaseShape></m:ItemShape>"#,
            r#"<m:IndexedPageItemView MaxEntriesReturned="{}" Offset="{}" BasePoint="Beginning"/>"#,
            r#"<m:ParentFolderIds>{}</m:ParentFolderIds></m:FindItem>"#
        ),
        PAGE_SIZE,
        offset,
        parent.to_xml()
    )
}

fn get_item_request(id: &str) -> String {
    format!(
        concat!(
            r#"<m:GetItem><m:ItemShape><t:BaseShape>Default</t:BaseShape>"#,
            r#"<t:AdditionalProperties>"#,
            r#"<t:FieldURI FieldURI="item:Attachments"/>"#,
            r#"<t:FieldURI FieldURI="item:DateTimeReceived"/>"#,
            r#"<t:FieldURI FieldURI="message:IsRead"/>"#,
            r#"</t:AdditionalProperties></m:ItemShape>"#,
            r#"<m:ItemIds><t:ItemId Id="{}"/></m:ItemIds></m:GetItem>"#
        ),
        escape(id)
    )
}

fn get_summary_request(id: &str) -> String {
    format!(
        concat!(
            r#"<m:GetItem><m:ItemShape><t:BaseShape>IdOnly</t:BaseShape>"#,
            r#"<t:AdditionalProperties>"#,
            r#"<t:FieldURI FieldURI="item:DateTimeReceived"/>"#,
            r#"<t:FieldURI FieldURI="message:IsRead"/>"#,
            r#"</t:AdditionalProperties></m:ItemShape>"#,
            r#"<m:ItemIds><t:ItemId Id="{}"/></m:ItemIds></m:GetItem>"#
        ),
        escape(id)
    )
}

fn get_attachment_request(ids: &[String]) -> String {
    let ids: String = ids
        .iter()
        .map(|id| format!(r#"<t:AttachmentId Id="{}"/>"#, escape(id.as_str())))
        .collect();
    format!(
        "<m:GetAttachment><m:AttachmentIds>{}</m:AttachmentIds></m:GetAttachment>",
        ids
    )
}

fn mark_read_request(id: &str) -> String {
    format!(
        concat!(
            r#"<m:UpdateItem MessageDisposition="SaveOnly" ConflictResolution="AlwaysOverwrite""#,
            r#" SuppressReadReceipts="true"><m:ItemChanges><t:ItemChange>"#,
            r#"<t:ItemId Id="{}"/><t:Updates><t:SetItemField>"#,
            r#"<t:FieldURI FieldURI="message:IsRead"/>"#,
            r#"<t:Message><t:IsRead>true</t:IsRead></t:Message>"#,
            r#"</t:SetItemField></t:Updates></t:ItemChange></m:ItemChanges></m:UpdateItem>"#
        ),
        escape(id)
    )
}

fn delete_item_request(id: &str) -> String {
    format!(
        concat!(
            r#"<m:DeleteItem DeleteType="MoveToDeletedItems">"#,
            r#"<m:ItemIds><t:ItemId Id="{}"/></m:ItemIds></m:DeleteItem>"#
        ),
        escape(id)
    )
}

/// Turns SOAP faults and `ResponseClass="Error"` messages into errors.
fn check_response(doc: &XmlNode) -> Result<()> {
    if let Some(fault) = doc.first_descendant("Fault") {
        return Err(MailboxError::Ews {
            code: fault.child_text("faultcode").unwrap_or("Fault").to_string(),
            message: fault.child_text("faultstring").unwrap_or_default().to_string(),
        });
    }

    let body = doc.first_descendant("Body").unwrap_or(doc);
    for node in body
        .descendants("ResponseMessages")
        .into_iter()
        .flat_map(|messages| messages.children.iter())
    {
        if node.attribute("ResponseClass") == Some("Error") {
            return Err(MailboxError::Ews {
                code: node.child_text("ResponseCode").unwrap_or("Error").to_string(),
                message: node.child_text("MessageText").unwrap_or_default().to_string(),
            });
        }
    }
    Ok(())
}

fn parse_folder_id(doc: &XmlNode) -> Option<String> {
    doc.first_descendant("Folders")
        .and_then(|folders| folders.first_descendant("FolderId"))
        .and_then(|id| id.attribute("Id"))
        .map(str::to_string)
}

/// Item ids of one FindItem page, and whether it was the last page.
fn parse_find_item(doc: &XmlNode) -> (Vec<String>, bool) {
    let Some(root) = doc.first_descendant("RootFolder") else {
        return (Vec::new(), true);
    };
    let last = root
        .attribute("IncludesLastItemInRange")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let ids = root
        .descendants("ItemId")
        .into_iter()
        .filter_map(|node| node.attribute("Id"))
        .map(str::to_string)
        .collect();
    (ids, last)
}

fn parse_get_item(doc: &XmlNode) -> Option<EwsItem> {
    let items = doc.first_descendant("Items")?;
    let item = items.children.first()?;

    let id = item.child("ItemId")?.attribute("Id")?.to_string();
    let sender = item
        .child("From")
        .or_else(|| item.child("Sender"))
        .and_then(|from| from.child("Mailbox"))
        .map(format_mailbox)
        .unwrap_or_default();
    let recipient = item
        .child("ToRecipients")
        .and_then(|to| to.child("Mailbox"))
        .map(format_mailbox);
    let received_at = item
        .child_text("DateTimeReceived")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let is_read = item
        .child_text("IsRead")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let attachment_ids = item
        .child("Attachments")
        .map(|attachments| {
            attachments
                .children
                .iter()
                .filter(|a| a.name == "FileAttachment")
                .filter_map(|a| a.child("AttachmentId")?.attribute("Id"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(EwsItem {
        id,
        subject: item.child_text("Subject").unwrap_or_default().to_string(),
        sender,
        recipient,
        received_at,
        is_read,
        attachment_ids,
    })
}

fn parse_summary(doc: &XmlNode) -> Option<MessageSummary> {
    let item = doc.first_descendant("Items")?.children.first()?;

    Some(MessageSummary {
        id: item.child("ItemId")?.attribute("Id")?.to_string(),
        received_at: item
            .child_text("DateTimeReceived")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc)),
        is_read: item
            .child_text("IsRead")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    })
}

fn parse_attachments(doc: &XmlNode) -> Result<Vec<Attachment>> {
    doc.descendants("FileAttachment")
        .into_iter()
        .map(|node| {
            let filename = node.child_text("Name").unwrap_or("attachment").to_string();
            let encoded: String = node
                .child_text("Content")
                .unwrap_or_default()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let content = BASE64.decode(encoded).map_err(|e| {
                MailboxError::ParseError(format!("attachment '{}': {}", filename, e))
            })?;

            let attachment = Attachment::new(filename, content);
            Ok(match node.child_text("ContentType") {
                Some(mime) if !mime.is_empty() => attachment.with_mime_type(mime),
                _ => attachment,
            })
        })
        .collect()
}

/// Formats an EWS Mailbox element as "Name <email>" or just the email.
fn format_mailbox(mailbox: &XmlNode) -> String {
    let address = mailbox.child_text("EmailAddress").unwrap_or_default();
    match mailbox.child_text("Name") {
        Some(name) if !name.is_empty() && name != address => format!("{} <{}>", name, address),
        _ => address.to_string(),
    }
}

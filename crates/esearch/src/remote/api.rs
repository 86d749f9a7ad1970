//! Wire format of the messages API and its parse boundary

use serde::Deserialize;

use super::{MessageDetail, MessageMetadata, MessagePage, ParseError};
use crate::models::{Contact, MessageId};

/// Success code carried in every response body
const CODE_OK: i64 = 1000;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListResponse {
    code: Option<i64>,
    error: Option<String>,
    total: Option<u64>,
    messages: Option<Vec<WireMessage>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetailResponse {
    code: Option<i64>,
    error: Option<String>,
    message: Option<WireMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMessage {
    #[serde(rename = "ID")]
    id: Option<String>,
    time: Option<i64>,
    order: Option<i64>,
    #[serde(rename = "LabelIDs", default)]
    label_ids: Vec<String>,
    #[serde(default)]
    unread: i64,
    #[serde(default)]
    subject: String,
    sender: Option<WireContact>,
    #[serde(default)]
    to_list: Vec<WireContact>,
    #[serde(rename = "CCList", default)]
    cc_list: Vec<WireContact>,
    #[serde(rename = "BCCList", default)]
    bcc_list: Vec<WireContact>,
    #[serde(rename = "AddressID", default)]
    address_id: String,
    #[serde(default)]
    num_attachments: u32,
    body: Option<String>,
    #[serde(rename = "MIMEType")]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireContact {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
}

impl From<WireContact> for Contact {
    fn from(c: WireContact) -> Self {
        Contact::with_name(c.name, c.address)
    }
}

fn check_code(code: Option<i64>, error: Option<String>) -> Result<(), ParseError> {
    match code {
        Some(CODE_OK) => Ok(()),
        Some(code) => Err(ParseError::Api {
            code,
            message: error.unwrap_or_default(),
        }),
        None => Err(ParseError::MissingField("Code")),
    }
}

impl WireMessage {
    fn into_metadata(self) -> Result<(MessageMetadata, Option<String>, Option<String>), ParseError> {
        let id = self.id.filter(|id| !id.is_empty()).ok_or(ParseError::MissingField("ID"))?;
        let time = self.time.ok_or(ParseError::MissingField("Time"))?;
        if time < 0 {
            return Err(ParseError::InvalidField {
                field: "Time",
                message: format!("negative timestamp {time}"),
            });
        }

        let metadata = MessageMetadata {
            id: MessageId::new(id),
            time,
            order: self.order.unwrap_or(0),
            label_ids: self.label_ids.into_iter().collect(),
            unread: self.unread != 0,
            subject: self.subject,
            sender: self.sender.map(Contact::from).unwrap_or_default(),
            to: self.to_list.into_iter().map(Contact::from).collect(),
            cc: self.cc_list.into_iter().map(Contact::from).collect(),
            bcc: self.bcc_list.into_iter().map(Contact::from).collect(),
            address_id: self.address_id,
            num_attachments: self.num_attachments,
        };
        Ok((metadata, self.body, self.mime_type))
    }
}

/// Parse a message listing response
pub fn parse_page(json: &str) -> Result<MessagePage, ParseError> {
    let response: ListResponse =
        serde_json::from_str(json).map_err(|e| ParseError::Json(e.to_string()))?;
    check_code(response.code, response.error)?;

    let total = response.total.ok_or(ParseError::MissingField("Total"))?;
    let messages = response
        .messages
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.into_metadata().map(|(metadata, _, _)| metadata))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MessagePage { messages, total })
}

/// Parse a single-message detail response
pub fn parse_detail(json: &str) -> Result<MessageDetail, ParseError> {
    let response: DetailResponse =
        serde_json::from_str(json).map_err(|e| ParseError::Json(e.to_string()))?;
    check_code(response.code, response.error)?;

    let message = response.message.ok_or(ParseError::MissingField("Message"))?;
    let (metadata, body, mime_type) = message.into_metadata()?;

    Ok(MessageDetail {
        metadata,
        body: body.ok_or(ParseError::MissingField("Body"))?,
        mime_type: mime_type.unwrap_or_else(|| "text/html".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let json = r#"{
            "Code": 1000,
            "Total": 3,
            "Messages": [
                {
                    "ID": "m3",
                    "Time": 300,
                    "Order": 2,
                    "LabelIDs": ["0", "5", "10"],
                    "Unread": 1,
                    "Subject": "Hello",
                    "Sender": {"Name": "Alice", "Address": "alice@example.com"},
                    "ToList": [{"Name": "", "Address": "bob@example.com"}],
                    "AddressID": "addr-1",
                    "NumAttachments": 2
                },
                {"ID": "m2", "Time": 200}
            ]
        }"#;

        let page = parse_page(json).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.messages.len(), 2);

        let first = &page.messages[0];
        assert_eq!(first.id.as_str(), "m3");
        assert!(first.unread);
        assert!(first.is_starred());
        assert_eq!(first.sender.display_name(), "Alice");
        assert_eq!(first.to[0].name, None);
        assert_eq!(first.num_attachments, 2);

        let second = &page.messages[1];
        assert_eq!(second.order, 0);
        assert!(second.label_ids.is_empty());
        assert!(!second.unread);
    }

    #[test]
    fn test_parse_page_missing_total() {
        let err = parse_page(r#"{"Code": 1000, "Messages": []}"#).unwrap_err();
        assert_eq!(err, ParseError::MissingField("Total"));
    }

    #[test]
    fn test_parse_page_message_without_id() {
        let err = parse_page(r#"{"Code": 1000, "Total": 1, "Messages": [{"Time": 5}]}"#).unwrap_err();
        assert_eq!(err, ParseError::MissingField("ID"));
    }

    #[test]
    fn test_parse_api_error() {
        let err = parse_page(r#"{"Code": 2001, "Error": "Invalid label"}"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::Api {
                code: 2001,
                message: "Invalid label".to_string()
            }
        );
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(parse_page("<html>"), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_parse_detail() {
        let json = r#"{
            "Code": 1000,
            "Message": {
                "ID": "m1",
                "Time": 100,
                "Subject": "Invoice",
                "Body": "-----BEGIN PGP MESSAGE-----",
                "MIMEType": "multipart/mixed"
            }
        }"#;
        let detail = parse_detail(json).unwrap();
        assert_eq!(detail.metadata.id.as_str(), "m1");
        assert_eq!(detail.mime_type, "multipart/mixed");
        assert!(detail.body.starts_with("-----BEGIN"));
    }

    #[test]
    fn test_parse_detail_without_body() {
        let json = r#"{"Code": 1000, "Message": {"ID": "m1", "Time": 100}}"#;
        assert_eq!(parse_detail(json).unwrap_err(), ParseError::MissingField("Body"));
    }
}

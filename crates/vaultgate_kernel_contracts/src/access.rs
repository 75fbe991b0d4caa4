#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::address::{ChainAddress, RoomId, TokenAmount};
use crate::moderation::ModerationVerdict;
use crate::policy::DenialReason;
use crate::ratelimit::SendDecision;
use crate::validation::ValidationResult;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateAccessRequest {
    pub vault_address: ChainAddress,
    pub user_address: ChainAddress,
    pub min_balance: TokenAmount,
}

impl ValidateAccessRequest {
    pub fn v1(vault: &str, user: &str, min_balance: &str) -> Result<Self, ContractViolation> {
        let r = Self {
            vault_address: ChainAddress::new(vault)?,
            user_address: ChainAddress::new(user)?,
            min_balance: TokenAmount::parse(min_balance)?,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for ValidateAccessRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.vault_address.validate()?;
        self.user_address.validate()?;
        self.min_balance.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanSendMessageRequest {
    pub user_address: ChainAddress,
    pub room_id: RoomId,
}

impl CanSendMessageRequest {
    pub fn v1(user: &str, room: &str) -> Result<Self, ContractViolation> {
        Ok(Self {
            user_address: ChainAddress::new(user)?,
            room_id: RoomId::new(room)?,
        })
    }
}

impl Validate for CanSendMessageRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.user_address.validate()?;
        self.room_id.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerateMessageRequest {
    pub text: String,
}

impl Validate for ModerateMessageRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.text.contains('\0') {
            return Err(ContractViolation::InvalidValue {
                field: "moderate_message_request.text",
                reason: "must not contain NUL",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender_address: ChainAddress,
    pub text: String,
}

impl SendMessageRequest {
    pub fn v1(room: &str, sender: &str, text: impl Into<String>) -> Result<Self, ContractViolation> {
        let r = Self {
            room_id: RoomId::new(room)?,
            sender_address: ChainAddress::new(sender)?,
            text: text.into(),
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for SendMessageRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.room_id.validate()?;
        self.sender_address.validate()?;
        ModerateMessageRequest {
            text: self.text.clone(),
        }
        .validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub vault_address: ChainAddress,
    pub creator_address: ChainAddress,
    pub min_balance: TokenAmount,
}

impl Validate for CreateRoomRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.vault_address.validate()?;
        self.creator_address.validate()?;
        self.min_balance.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDirectChannelRequest {
    pub vault_address: ChainAddress,
    pub initiator_address: ChainAddress,
    pub recipient_address: ChainAddress,
    pub min_balance: TokenAmount,
}

impl Validate for OpenDirectChannelRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.vault_address.validate()?;
        self.initiator_address.validate()?;
        self.recipient_address.validate()?;
        self.min_balance.validate()?;
        if self.initiator_address == self.recipient_address {
            return Err(ContractViolation::InvalidValue {
                field: "open_direct_channel_request.recipient_address",
                reason: "must differ from initiator_address",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAdmission {
    pub admitted: bool,
    pub rate: SendDecision,
    /// Absent when the rate limiter already refused the message.
    pub moderation: Option<ModerationVerdict>,
}

impl MessageAdmission {
    pub fn reason(&self) -> Option<DenialReason> {
        if self.admitted {
            return None;
        }
        self.rate
            .reason
            .or_else(|| self.moderation.as_ref().and_then(|m| m.reason))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectChannelDecision {
    pub allowed: bool,
    pub initiator: ValidationResult,
    /// Not evaluated when the initiator already failed.
    pub recipient: Option<ValidationResult>,
}

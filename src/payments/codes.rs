//! Gateway response-code tables.

use crate::payments::types::PaymentStatus;

const SUCCESS_CODES: [&str; 3] = ["000", "121", "200"];
const FAILED_CODES: [&str; 9] = ["101", "105", "110", "111", "112", "115", "118", "199", "999"];
const PENDING_CODES: [&str; 3] = ["124", "157", "210"];

/// Maps a gateway response code onto a payment status.
///
/// Total over all inputs: anything not listed (and not a `4xx` card decline)
/// is `Unknown` and must be reconciled later.
pub fn classify(code: &str) -> PaymentStatus {
    let code = code.trim();
    if SUCCESS_CODES.contains(&code) {
        PaymentStatus::Success
    } else if FAILED_CODES.contains(&code) || is_card_decline(code) {
        PaymentStatus::Failed
    } else if PENDING_CODES.contains(&code) {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Unknown
    }
}

fn is_card_decline(code: &str) -> bool {
    code.len() == 3 && code.starts_with('4') && code.bytes().all(|b| b.is_ascii_digit())
}

/// User-facing message for a gateway response code.
pub fn user_message(code: &str) -> String {
    let code = code.trim();
    let message = match code {
        "000" => "Transaction completed successfully",
        "121" => "Transaction confirmed successfully",
        "200" => "Transaction approved",

        // wallet
        "001" => "Transaction limit exceeded. Please contact your bank",
        "002" => "Account not found. Please verify your account details",
        "003" => "Account is inactive. Please contact your wallet provider",
        "004" => "Insufficient balance. Please add funds to your account",
        "024" => "Incorrect MPIN. Please try again with the correct MPIN",

        // card
        "102" => "Card is blocked. Please contact your bank",
        "404" => "Card has expired. Please use a valid card",
        "405" => "Insufficient balance on card. Please check your card balance",
        "415" => "3D Secure verification failed. Please check your 3D Secure ID",
        "416" => "CVV verification failed. Please check your CVV and try again",
        "419" => {
            "Card is not enrolled in 3D Secure. Please contact your bank to activate 3D Secure"
        }
        "424" => "Incorrect CVV. Please enter the correct CVV and try again",

        // merchant / transaction
        "101" => "Invalid merchant credentials",
        "105" => "Transaction exceeds limit. Please contact support",
        "110" => "Invalid transaction value",
        "111" => "Transaction not allowed",
        "112" => "Transaction was cancelled",
        "115" => "Security verification failed. Please try again",
        "116" => "Transaction has expired. Please initiate a new transaction",
        "134" => "Transaction timed out. Please try again",
        "999" => "Transaction failed due to a technical issue. Please try again later",

        "124" => "Order is pending. Waiting for payment confirmation",
        "157" => "Transaction is pending. Please wait for confirmation",
        "210" => "Authorization pending. Please wait",

        "410" | "412" => "Transaction was cancelled by you",
        "118" | "127" => "Service is temporarily under maintenance. Please try again later",

        "" => "Transaction failed. Please try again",
        other => return format!("Transaction failed with code: {}. Please contact support", other),
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes() {
        for code in ["000", "121", "200"] {
            assert_eq!(classify(code), PaymentStatus::Success, "{}", code);
        }
    }

    #[test]
    fn pending_codes() {
        for code in ["157", "124", "210"] {
            assert_eq!(classify(code), PaymentStatus::Pending, "{}", code);
        }
    }

    #[test]
    fn failed_codes() {
        for code in ["101", "105", "110", "111", "112", "115", "118", "199", "999"] {
            assert_eq!(classify(code), PaymentStatus::Failed, "{}", code);
        }
    }

    #[test]
    fn unrecognized_4xx_is_failed() {
        assert_eq!(classify("404"), PaymentStatus::Failed);
        assert_eq!(classify("477"), PaymentStatus::Failed);
        assert_eq!(classify("4AB"), PaymentStatus::Unknown);
        assert_eq!(classify("4000"), PaymentStatus::Unknown);
    }

    #[test]
    fn everything_else_is_unknown() {
        for code in ["", "001", "024", "134", "300", "abc", "12"] {
            assert_eq!(classify(code), PaymentStatus::Unknown, "{:?}", code);
        }
    }

    #[test]
    fn messages_cover_known_and_unknown_codes() {
        assert_eq!(user_message("000"), "Transaction completed successfully");
        assert_eq!(user_message("157"), "Transaction is pending. Please wait for confirmation");
        assert_eq!(user_message("412"), "Transaction was cancelled by you");
        assert_eq!(
            user_message("777"),
            "Transaction failed with code: 777. Please contact support"
        );
        assert_eq!(user_message(""), "Transaction failed. Please try again");
        assert_eq!(user_message("   "), "Transaction failed. Please try again");
    }
}

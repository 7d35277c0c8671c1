use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;

use crate::auth::RESET_TOKEN_TTL_MINUTES;

/// SES sender for account mail
pub struct Mailer {
    client: SesClient,
    from_address: String,
}

impl Mailer {
    pub fn new(client: SesClient, from_address: impl Into<String>) -> Self {
        Self {
            client,
            from_address: from_address.into(),
        }
    }

    /// Send the password reset link
    pub async fn send_password_reset(&self, to_email: &str, reset_link: &str) -> Result<(), String> {
        let (html_body, text_body) = reset_bodies(reset_link);

        let destination = Destination::builder().to_addresses(to_email).build();

        let subject = Content::builder()
            .data("パスワード再設定のご案内")
            .charset("UTF-8")
            .build()
            .map_err(|e| format!("Failed to build subject: {:?}", e))?;

        let html_content = Content::builder()
            .data(html_body)
            .charset("UTF-8")
            .build()
            .map_err(|e| format!("Failed to build HTML content: {:?}", e))?;

        let text_content = Content::builder()
            .data(text_body)
            .charset("UTF-8")
            .build()
            .map_err(|e| format!("Failed to build text content: {:?}", e))?;

        let body = Body::builder().html(html_content).text(text_content).build();
        let message = Message::builder().subject(subject).body(body).build();
        let email_content = EmailContent::builder().simple(message).build();

        self.client
            .send_email()
            .from_email_address(&self.from_address)
            .destination(destination)
            .content(email_content)
            .send()
            .await
            .map_err(|e| format!("Failed to send email: {:?}", e))?;

        tracing::info!("Password reset mail sent");
        Ok(())
    }
}

fn reset_bodies(reset_link: &str) -> (String, String) {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Helvetica, Arial, sans-serif; color: #333333; line-height: 1.6; }}
        .container {{ max-width: 560px; margin: 0 auto; padding: 40px 24px; border: 1px solid #e5e5e5; }}
        .button {{ display: inline-block; padding: 14px 24px; background: #1f6feb; color: #ffffff; text-decoration: none; }}
        .link {{ word-break: break-all; font-size: 13px; color: #666666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>パスワード再設定</h2>
        <p>以下のボタンから新しいパスワードを設定してください。</p>
        <p><a href="{link}" class="button">パスワードを再設定する</a></p>
        <p class="link">{link}</p>
        <p>このリンクの有効期限は{minutes}分です。心当たりがない場合はこのメールを破棄してください。</p>
    </div>
</body>
</html>"#,
        link = reset_link,
        minutes = RESET_TOKEN_TTL_MINUTES
    );

    let text = format!(
        "パスワード再設定\n\n以下のリンクから新しいパスワードを設定してください。\n\n{}\n\nこのリンクの有効期限は{}分です。心当たりがない場合はこのメールを破棄してください。",
        reset_link, RESET_TOKEN_TTL_MINUTES
    );

    (html, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_bodies_carry_link() {
        let link = "https://example.com/reset-password?token=abc";
        let (html, text) = reset_bodies(link);
        assert!(html.contains(r#"href="https://example.com/reset-password?token=abc""#));
        assert!(text.contains(link));
        assert!(text.contains("60分"));
    }
}

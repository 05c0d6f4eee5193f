use super::*;
use crate::config::GenerationConfig;

fn test_client() -> OpenAiChatClient {
    OpenAiChatClient::new(&GenerationConfig {
        enabled: true,
        endpoint: "http://localhost:9999".to_string(),
        api_key: Some("sk-test".to_string()),
        model: "test-model".to_string(),
        timeout_seconds: 5,
    })
    .expect("client builds")
}

#[test]
fn text_request_uses_plain_content() {
    let client = test_client();
    let body = client.request_body(&GenerationRequest::text("Summarize this.".to_string()));

    assert_eq!(body["model"], "test-model");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "Summarize this.");
}

#[test]
fn multimodal_request_encodes_data_urls() {
    let client = test_client();
    let request = GenerationRequest {
        prompt: "Describe the image.".to_string(),
        images: vec![ImagePart {
            media_type: "image/png".to_string(),
            data: vec![0x89, 0x50, 0x4E, 0x47],
        }],
    };
    let body = client.request_body(&request);

    let parts = body["messages"][0]["content"]
        .as_array()
        .expect("content is a part list");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["type"], "image_url");

    let url = parts[1]["image_url"]["url"].as_str().expect("data url");
    assert!(url.starts_with("data:image/png;base64,"));
}

#[test]
fn chat_response_extracts_first_choice() {
    let parsed: ChatResponse = serde_json::from_str(
        r#"{"choices": [{"message": {"role": "assistant", "content": "The Louvre."}}]}"#,
    )
    .expect("deserializes");
    assert_eq!(
        parsed.choices[0].message.content.as_deref(),
        Some("The Louvre.")
    );
}

#[test]
fn answer_response_defaults_citations() {
    let parsed: AnswerResponse =
        serde_json::from_str(r#"{"answer": "It is raining."}"#).expect("deserializes");
    assert_eq!(parsed.answer, "It is raining.");
    assert!(parsed.citations.is_empty());
}

#[test]
fn generated_answer_emptiness() {
    assert!(GeneratedAnswer::default().is_empty());
    assert!(
        GeneratedAnswer {
            text: "   ".to_string(),
            citations: Vec::new(),
        }
        .is_empty()
    );
    assert!(
        !GeneratedAnswer {
            text: "answer".to_string(),
            citations: Vec::new(),
        }
        .is_empty()
    );
}

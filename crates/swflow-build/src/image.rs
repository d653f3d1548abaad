//! イメージ名の解決
//!
//! `--image` の完全名を `[registry/][repository/]name[:tag]` に分解し、
//! 個別オプションで各部分を上書きします。

use crate::error::{BuildError, Result};
use std::fmt;

/// build コマンドのイメージ関連オプション
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// カンマ区切りの Quarkus 拡張
    pub extensions: String,
    pub image: Option<String>,
    pub image_registry: Option<String>,
    pub image_repository: Option<String>,
    pub image_name: Option<String>,
    pub image_tag: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl BuildOptions {
    pub fn validate(&self) -> Result<()> {
        if non_empty(&self.image).is_none() && non_empty(&self.image_name).is_none() {
            return Err(BuildError::MissingImageName);
        }
        Ok(())
    }

    pub fn extension_list(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// オプションからイメージ参照を組み立てる
    pub fn image_ref(&self) -> Result<ImageRef> {
        self.validate()?;
        ImageRef::resolve(
            non_empty(&self.image),
            non_empty(&self.image_registry),
            non_empty(&self.image_repository),
            non_empty(&self.image_name),
            non_empty(&self.image_tag),
        )
    }

    /// Knative サービス名（--image-name があればそれ、なければイメージ名）
    pub fn knative_name(&self, image: &ImageRef) -> String {
        non_empty(&self.image_name)
            .map(str::to_string)
            .unwrap_or_else(|| image.name.clone())
    }
}

/// 分解済みのイメージ参照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    /// 完全名を分解（タグなしは "latest"）
    ///
    /// # Examples
    /// - `quay.io/org/app:v1.0` -> registry `quay.io`, repository `org`, name `app`
    /// - `org/app` -> repository `org`, name `app`
    /// - `localhost:5000/app` -> registry `localhost:5000`, name `app`
    pub fn parse(image: &str) -> Self {
        let (path, tag) = split_image_tag(image);
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

        let (registry, repository, name) = match parts.as_slice() {
            [] => ("", String::new(), ""),
            [name] => ("", String::new(), *name),
            [first, name] if is_registry(first) => (*first, String::new(), *name),
            [repository, name] => ("", repository.to_string(), *name),
            [registry, middle @ .., name] => (*registry, middle.join("/"), *name),
        };

        Self {
            registry: registry.to_string(),
            repository,
            name: name.to_string(),
            tag,
        }
    }

    /// 完全名と個別指定からイメージ参照を決定
    ///
    /// 個別指定は完全名の対応する部分を上書きします。
    pub fn resolve(
        image: Option<&str>,
        registry: Option<&str>,
        repository: Option<&str>,
        name: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Self> {
        let mut resolved = image.map(Self::parse).unwrap_or_else(|| Self {
            tag: "latest".to_string(),
            ..Default::default()
        });

        if let Some(registry) = registry {
            resolved.registry = registry.to_string();
        }
        if let Some(repository) = repository {
            resolved.repository = repository.to_string();
        }
        if let Some(name) = name {
            resolved.name = name.to_string();
        }
        if let Some(tag) = tag {
            resolved.tag = tag.to_string();
        }

        check_image_name(&resolved.name)?;
        validate_tag(&resolved.tag)?;
        Ok(resolved)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        if !self.repository.is_empty() {
            write!(f, "{}/", self.repository)?;
        }
        write!(f, "{}:{}", self.name, self.tag)
    }
}

fn is_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// イメージ名とタグを分離
///
/// `localhost:5000/app` のようなポート番号はタグとして扱いません。
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        if !potential_tag.contains('/') && !potential_tag.is_empty() {
            return (image[..pos].to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// イメージ名のバリデーション
///
/// 英小文字・数字・`.`・`_`・`-` のみ、先頭は英数字。
pub fn check_image_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| BuildError::InvalidImageName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = name.chars().next() else {
        return Err(invalid("empty name"));
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(invalid("must start with a lowercase letter or digit"));
    }
    if let Some(c) = name.chars().find(|c| {
        !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    }) {
        return Err(invalid(&format!("invalid character '{}'", c)));
    }
    Ok(())
}

/// タグのバリデーション
fn validate_tag(tag: &str) -> Result<()> {
    // Docker タグの制約:
    // - 128文字以下
    // - 英数字、ピリオド、ハイフン、アンダースコアのみ
    // - 先頭はピリオドまたはハイフンではない
    let invalid = |reason: String| BuildError::InvalidTag {
        tag: tag.to_string(),
        reason,
    };

    if tag.is_empty() {
        return Err(invalid("empty tag".to_string()));
    }
    if tag.len() > 128 {
        return Err(invalid(format!("too long ({} characters, max 128)", tag.len())));
    }
    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(invalid("must not start with '.' or '-'".to_string()));
    }
    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(invalid(format!("invalid character '{}'", c)));
    }
    Ok(())
}

//! Container image reference parsing
//!
//! Splits `host[:port]/path[:tag][@digest]` into its parts without validating
//! them. Parsing is total: anything that does not look like a tag or digest
//! stays in the URL.

/// Registry host used when an image names none
pub const DEFAULT_HOST: &str = "docker.io";

/// Docker Hub namespace of single-segment official images
const DOCKER_HUB_LIBRARY: &str = "library";

/// The parts of a declared container image
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageReference {
    /// Everything before the tag/digest, e.g. `localhost:5000/app`
    pub url: String,
    /// Tag, empty when none was declared
    pub tag: String,
    /// Digest, empty when none was declared
    pub digest: String,
}

/// Parse a declared image into URL, tag and digest.
///
/// Examples:
/// - "nginx" -> ("nginx", "", "")
/// - "nginx:1.25" -> ("nginx", "1.25", "")
/// - "localhost:5000/app:v1@sha256:abc" -> ("localhost:5000/app", "v1", "sha256:abc")
/// - "localhost:5000/app" -> ("localhost:5000/app", "", "")
pub fn parse_image(image: &str) -> ImageReference {
    if let Some((left, digest)) = image.split_once('@') {
        // Only look for the tag separator after the first '/', so that the
        // port of a registry host is not mistaken for a tag.
        let search_from = left.find('/').unwrap_or(0);
        let (url, tag) = match left[search_from..].find(':') {
            Some(i) => {
                let colon = search_from + i;
                (&left[..colon], &left[colon + 1..])
            }
            None => (left, ""),
        };

        return ImageReference {
            url: url.to_string(),
            tag: tag.to_string(),
            digest: digest.to_string(),
        };
    }

    let Some(colon) = image.rfind(':') else {
        return ImageReference {
            url: image.to_string(),
            ..Default::default()
        };
    };

    if image.rfind('/').is_some_and(|slash| colon < slash) {
        return ImageReference {
            url: image.to_string(),
            ..Default::default()
        };
    }

    ImageReference {
        url: image[..colon].to_string(),
        tag: image[colon + 1..].to_string(),
        digest: String::new(),
    }
}

/// Where an image lives: registry host, repository path and image name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    pub host: String,
    pub repo: String,
    pub image: String,
}

impl ImageLocation {
    /// Repository name as used by the distribution API, e.g. `library/nginx`
    pub fn name(&self) -> String {
        if self.repo.is_empty() {
            self.image.clone()
        } else {
            format!("{}/{}", self.repo, self.image)
        }
    }
}

/// Split an image URL (without tag or digest) into host, repository and image.
///
/// The first path segment is a registry host when it contains `.` or `:` or is
/// `localhost`; otherwise the image lives on Docker Hub.
pub fn split_image_url(url: &str) -> ImageLocation {
    let (host, path) = match url.split_once('/') {
        Some((first, rest)) if is_host(first) => (first, rest),
        _ => (DEFAULT_HOST, url),
    };

    let (repo, image) = match path.rsplit_once('/') {
        Some((repo, image)) => (repo.to_string(), image.to_string()),
        None if host == DEFAULT_HOST => (DOCKER_HUB_LIBRARY.to_string(), path.to_string()),
        None => (String::new(), path.to_string()),
    };

    ImageLocation {
        host: host.to_string(),
        repo,
        image,
    }
}

fn is_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

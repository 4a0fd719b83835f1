//! Static catalog of the blocks and attributes a bake file may contain.
//!
//! Attribute lists are kept in alphabetical order; completion relies on it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    String,
    Bool,
    Number,
    ListOfString,
    MapOfString,
    MapOfListOfString,
    Any,
}

impl ValueShape {
    /// Human-readable name of the shape, e.g. `list of string`.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::ListOfString => "list of string",
            Self::MapOfString => "map of string",
            Self::MapOfListOfString => "map of list of string",
            Self::Any => "any",
        }
    }

    /// Snippet text for a placeholder value of this shape.
    #[must_use]
    pub fn value_snippet(self) -> &'static str {
        match self {
            Self::String => "\"${1:value}\"",
            Self::Bool => "${1:false}",
            Self::Number => "${1:0}",
            Self::ListOfString => "[ \"${1:value}\" ]",
            Self::MapOfString => "{\n  ${1:key} = \"${2:value}\"\n}",
            Self::MapOfListOfString => "{\n  ${1:key} = [ \"${2:value}\" ]\n}",
            Self::Any => "${1}",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: &'static str,
    pub optional: bool,
    pub shape: ValueShape,
    pub description: &'static str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BlockSchema {
    pub name: &'static str,
    pub description: &'static str,
    /// Placeholder names of the labels, used for snippets.
    pub labels: &'static [&'static str],
    pub attributes: &'static [AttributeSchema],
    pub blocks: &'static [BlockSchema],
}

impl BlockSchema {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&'static AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn block(&self, name: &str) -> Option<&'static BlockSchema> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Snippet text for a new block of this type with an empty body.
    #[must_use]
    pub fn snippet(&self) -> String {
        let labels: String = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| format!(" \"${{{}:{label}}}\"", i + 1))
            .collect();
        format!(
            "{}{labels} {{\n  ${{{}}}\n}}",
            self.name,
            self.labels.len() + 1
        )
    }
}

/// The root block types, alphabetically.
pub static ROOT_BLOCKS: &[BlockSchema] = &[FUNCTION, GROUP, TARGET, VARIABLE];

#[must_use]
pub fn root_block(name: &str) -> Option<&'static BlockSchema> {
    ROOT_BLOCKS.iter().find(|b| b.name == name)
}

const fn attribute(
    name: &'static str,
    optional: bool,
    shape: ValueShape,
    description: &'static str,
) -> AttributeSchema {
    AttributeSchema {
        name,
        optional,
        shape,
        description,
    }
}

const FUNCTION: BlockSchema = BlockSchema {
    name: "function",
    description: "A function defines a reusable block of HCL that can be called from other parts of the Bake file.",
    labels: &["functionName"],
    attributes: &[
        attribute(
            "params",
            false,
            ValueShape::MapOfString,
            "Map of parameter names to their types that the function accepts.",
        ),
        attribute(
            "result",
            false,
            ValueShape::Any,
            "HCL expression that defines what the function returns when called.",
        ),
        attribute(
            "variadic_param",
            true,
            ValueShape::String,
            "Name of a variadic parameter that can accept multiple arguments of the specified type.",
        ),
    ],
    blocks: &[],
};

const GROUP: BlockSchema = BlockSchema {
    name: "group",
    description: "A group is a grouping of targets. Groups allow you to build multiple targets together.",
    labels: &["groupName"],
    attributes: &[
        attribute(
            "description",
            true,
            ValueShape::String,
            "A description for the group that will be shown in the help output.",
        ),
        attribute(
            "name",
            true,
            ValueShape::String,
            "Override the name of the group. If not specified, the group name from the label is used.",
        ),
        attribute(
            "targets",
            true,
            ValueShape::ListOfString,
            "List of targets that belong to this group. When building the group, all specified targets will be built.",
        ),
    ],
    blocks: &[],
};

const VALIDATION: BlockSchema = BlockSchema {
    name: "validation",
    description: "Validation rules for the variable to ensure the provided value meets certain criteria.",
    labels: &[],
    attributes: &[
        attribute(
            "condition",
            false,
            ValueShape::Bool,
            "A boolean expression that must evaluate to true for the variable value to be valid.",
        ),
        attribute(
            "error_message",
            true,
            ValueShape::String,
            "Custom error message to display when the validation condition fails.",
        ),
    ],
    blocks: &[],
};

const VARIABLE: BlockSchema = BlockSchema {
    name: "variable",
    description: "A variable defines an input parameter that can be used throughout the Bake file.",
    labels: &["variableName"],
    attributes: &[
        attribute(
            "default",
            true,
            ValueShape::Any,
            "Default value to use for the variable if no value is provided. Can be a string, number, boolean, or list.",
        ),
        attribute(
            "description",
            true,
            ValueShape::String,
            "A description for the variable that will be shown in the help output.",
        ),
        attribute(
            "type",
            true,
            ValueShape::Any,
            "Type constraint for the value of the variable.",
        ),
    ],
    blocks: &[VALIDATION],
};

const TARGET: BlockSchema = BlockSchema {
    name: "target",
    description: "A target reflects a single `docker build` invocation.",
    labels: &["targetName"],
    attributes: &[
        attribute(
            "annotations",
            true,
            ValueShape::ListOfString,
            "Add annotations to the image. This has the same effect as passing [`--annotation`](https://docs.docker.com/reference/cli/docker/buildx/build/#annotation) flags to the build command.",
        ),
        attribute(
            "args",
            true,
            ValueShape::MapOfString,
            "Use the `args` attribute to define build arguments for the target. This has the same effect as passing a [`--build-arg`](https://docs.docker.com/reference/cli/docker/buildx/build/#build-arg) flag to the build command.",
        ),
        attribute(
            "attest",
            true,
            ValueShape::ListOfString,
            "Add attestations to the image. This has the same effect as passing [`--attest`](https://docs.docker.com/reference/cli/docker/buildx/build/#attest) flags to the build command.",
        ),
        attribute(
            "cache-from",
            true,
            ValueShape::ListOfString,
            "External cache sources for the build. This has the same effect as passing [`--cache-from`](https://docs.docker.com/reference/cli/docker/buildx/build/#cache-from) flags to the build command.",
        ),
        attribute(
            "cache-to",
            true,
            ValueShape::ListOfString,
            "External cache destinations for the build. This has the same effect as passing [`--cache-to`](https://docs.docker.com/reference/cli/docker/buildx/build/#cache-to) flags to the build command.",
        ),
        attribute(
            "call",
            true,
            ValueShape::String,
            "Set the call method for the target. Can be `build`, `check`, or a custom method.",
        ),
        attribute(
            "context",
            true,
            ValueShape::String,
            "Build context path. This has the same effect as passing the context argument to the [`docker buildx build`](https://docs.docker.com/reference/cli/docker/buildx/build/) command.",
        ),
        attribute(
            "contexts",
            true,
            ValueShape::MapOfString,
            "Additional build contexts for the build. This has the same effect as passing [`--build-context`](https://docs.docker.com/reference/cli/docker/buildx/build/#build-context) flags to the build command.",
        ),
        attribute(
            "description",
            true,
            ValueShape::String,
            "A description for the target that will be shown in the help output.",
        ),
        attribute(
            "dockerfile",
            true,
            ValueShape::String,
            "Path to the Dockerfile to use for the build. This has the same effect as passing [`--file`](https://docs.docker.com/reference/cli/docker/buildx/build/#file) flag to the build command.",
        ),
        attribute(
            "dockerfile-inline",
            true,
            ValueShape::String,
            "Inline Dockerfile content instead of reading from a file. This has the same effect as passing [`--file -`](https://docs.docker.com/reference/cli/docker/buildx/build/#file) to the build command.",
        ),
        attribute(
            "entitlements",
            true,
            ValueShape::ListOfString,
            "Allow extra privileged entitlements for the build. This has the same effect as passing [`--allow`](https://docs.docker.com/reference/cli/docker/buildx/build/#allow) flags to the build command.",
        ),
        attribute(
            "inherits",
            true,
            ValueShape::ListOfString,
            "List of other targets to inherit attributes from. Attributes from inherited targets will be merged with this target's attributes.",
        ),
        attribute(
            "labels",
            true,
            ValueShape::MapOfString,
            "Add metadata labels to the image. This has the same effect as passing [`--label`](https://docs.docker.com/reference/cli/docker/buildx/build/#label) flags to the build command.",
        ),
        attribute(
            "matrix",
            true,
            ValueShape::MapOfListOfString,
            "Define a matrix of values to create multiple variants of this target. Each combination of matrix values will create a separate build.",
        ),
        attribute(
            "name",
            true,
            ValueShape::String,
            "Override the name of the target. If not specified, the target name from the label is used.",
        ),
        attribute(
            "network",
            true,
            ValueShape::String,
            "Set the networking mode for RUN instructions. This has the same effect as passing [`--network`](https://docs.docker.com/reference/cli/docker/buildx/build/#network) flag to the build command.",
        ),
        attribute(
            "no-cache",
            true,
            ValueShape::Bool,
            "Do not use cache when building the image. This has the same effect as passing [`--no-cache`](https://docs.docker.com/reference/cli/docker/buildx/build/#no-cache) flag to the build command.",
        ),
        attribute(
            "no-cache-filter",
            true,
            ValueShape::ListOfString,
            "Do not use cache for specified stages. This has the same effect as passing [`--no-cache-filter`](https://docs.docker.com/reference/cli/docker/buildx/build/#no-cache-filter) flags to the build command.",
        ),
        attribute(
            "output",
            true,
            ValueShape::ListOfString,
            "Output destinations for the build result. This has the same effect as passing [`--output`](https://docs.docker.com/reference/cli/docker/buildx/build/#output) flags to the build command.",
        ),
        attribute(
            "platforms",
            true,
            ValueShape::ListOfString,
            "Target platforms for the build. This has the same effect as passing [`--platform`](https://docs.docker.com/reference/cli/docker/buildx/build/#platform) flags to the build command.",
        ),
        attribute(
            "pull",
            true,
            ValueShape::Bool,
            "Always attempt to pull newer versions of base images. This has the same effect as passing [`--pull`](https://docs.docker.com/reference/cli/docker/buildx/build/#pull) flag to the build command.",
        ),
        attribute(
            "push",
            true,
            ValueShape::Bool,
            "Push the built image to a registry. This has the same effect as passing [`--push`](https://docs.docker.com/reference/cli/docker/buildx/build/#push) flag to the build command.",
        ),
        attribute(
            "resource",
            true,
            ValueShape::String,
            "Override the configured resource limits for the build.",
        ),
        attribute(
            "secret",
            true,
            ValueShape::ListOfString,
            "Secrets to expose to the build. This has the same effect as passing [`--secret`](https://docs.docker.com/reference/cli/docker/buildx/build/#secret) flags to the build command.",
        ),
        attribute(
            "shm-size",
            true,
            ValueShape::String,
            "Size of `/dev/shm` for RUN instructions. This has the same effect as passing [`--shm-size`](https://docs.docker.com/reference/cli/docker/buildx/build/#shm-size) flag to the build command.",
        ),
        attribute(
            "ssh",
            true,
            ValueShape::ListOfString,
            "SSH agent sockets or keys to expose to the build. This has the same effect as passing [`--ssh`](https://docs.docker.com/reference/cli/docker/buildx/build/#ssh) flags to the build command.",
        ),
        attribute(
            "tags",
            true,
            ValueShape::ListOfString,
            "Image names and tags for the built image. This has the same effect as passing [`--tag`](https://docs.docker.com/reference/cli/docker/buildx/build/#tag) flags to the build command.",
        ),
        attribute(
            "target",
            true,
            ValueShape::String,
            "Set the target build stage to build. This has the same effect as passing [`--target`](https://docs.docker.com/reference/cli/docker/buildx/build/#target) flag to the build command.",
        ),
        attribute(
            "ulimits",
            true,
            ValueShape::ListOfString,
            "Ulimit options for the build container. This has the same effect as passing [`--ulimit`](https://docs.docker.com/reference/cli/docker/buildx/build/#ulimit) flags to the build command.",
        ),
    ],
    blocks: &[],
};
